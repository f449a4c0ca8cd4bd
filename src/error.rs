use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Http2ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl Http2ErrorCode {
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        Self::from_u32(value).unwrap_or(Self::InternalError)
    }
}

/// A violation of the connection-wide protocol contract. The connection task
/// answers this with GOAWAY(code, reason) carrying the last peer stream id it
/// processed, then closes the socket.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("connection error {code:?}: {reason}")]
pub struct ConnectionError {
    pub code: Http2ErrorCode,
    pub reason: String,
}

impl ConnectionError {
    pub fn new(code: Http2ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::ProtocolError, reason)
    }

    pub fn frame_size(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::FrameSizeError, reason)
    }

    pub fn flow_control(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::FlowControlError, reason)
    }

    pub fn compression(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::CompressionError, reason)
    }
}

/// A violation scoped to a single stream. Answered with RST_STREAM(code); the
/// connection otherwise keeps running.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("stream error {code:?}: {reason}")]
pub struct StreamError {
    pub code: Http2ErrorCode,
    pub reason: String,
}

impl StreamError {
    pub fn new(code: Http2ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::ProtocolError, reason)
    }

    pub fn flow_control(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::FlowControlError, reason)
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::RefusedStream, reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(Http2ErrorCode::InternalError, reason)
    }
}

/// An error surfacing from the byte-stream transport itself (socket I/O,
/// read timeout). Distinct from protocol errors: there is no peer to answer.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("read timed out")]
    Timeout,
    #[error("socket closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Either a connection-fatal error or a single-stream error, the two
/// outcomes `Connection::handle_frame` needs to distinguish when dispatching
/// an inbound frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
