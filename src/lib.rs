#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

mod config;
mod connection;
mod error;
mod flags;
mod flow_control;
mod frame;
mod handler;
mod hpack;
mod registry;
mod settings;
mod stream;
mod transport;

pub use bytes::Bytes;
pub use config::Config;
pub use connection::Connection;
pub use error::{ConnectionError, DispatchError, Http2ErrorCode, StreamError, TransportError};
pub use frame::{Deserialized, Frame, FrameType, PriorityFields, StreamId};
pub use handler::{Handler, HandlerError, Request, StreamHandle, TerminationOutcome, ToConnection};
pub use hpack::HeaderField;
pub use settings::{Settings, SettingsParameter};
pub use transport::{handle_connection, handle_shutdown, read_preface, CLIENT_PREFACE};
