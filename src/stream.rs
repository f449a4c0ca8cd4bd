use crate::error::{Http2ErrorCode, StreamError};
use crate::flow_control::Window;
use crate::frame::StreamId;
use crate::hpack::HeaderField;
use bytes::{Bytes, BytesMut};
use log::trace;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// https://httpwg.org/specs/rfc7540.html#StreamStates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Which side opened the stream: client ids are odd, server (push) ids are
/// even, and each side's ids must strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Client,
    Server,
}

/// A continuation expectation: a HEADERS or PUSH_PROMISE frame without
/// END_HEADERS obligates the very next frame on this stream to be
/// CONTINUATION, else PROTOCOL_ERROR (connection-scoped, checked by the
/// connection before frames even reach the stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBlockKind {
    Request,
    Trailers,
    PushPromise,
}

/// A DATA write a handler task asked for that could not be fully admitted
/// under the current flow-control windows. The connection task drains these
/// as WINDOW_UPDATEs arrive and replies on `reply` once flushed.
pub struct PendingSend {
    pub data: Bytes,
    pub end_stream: bool,
    pub reply: oneshot::Sender<Result<(), StreamError>>,
}

pub struct Stream {
    pub id: StreamId,
    pub initiator: Initiator,
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: Window,

    /// Set while a HEADERS/PUSH_PROMISE block is still awaiting CONTINUATION.
    pub continuation_expected: Option<HeaderBlockKind>,
    header_block_buffer: BytesMut,
    pub request_headers: Vec<HeaderField>,
    pub trailers: Option<Vec<HeaderField>>,
    request_headers_done: bool,

    pub content_length: Option<u64>,
    pub received_data_bytes: u64,

    /// SPSC channel into the handler task's `receive_body`.
    pub body_tx: Option<mpsc::Sender<Bytes>>,
    pub pending_sends: VecDeque<PendingSend>,
    pub push_parent: Option<StreamId>,
    pub rst_sent_at: Option<std::time::Instant>,
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId, initiator: Initiator, initial_send_window: i64, initial_recv_window: i64) -> Self {
        Self {
            id,
            initiator,
            state: StreamState::Idle,
            send_window: Window::new(initial_send_window),
            recv_window: Window::new(initial_recv_window),
            continuation_expected: None,
            header_block_buffer: BytesMut::with_capacity(4096),
            request_headers: Vec::new(),
            trailers: None,
            request_headers_done: false,
            content_length: None,
            received_data_bytes: 0,
            body_tx: None,
            pending_sends: VecDeque::new(),
            push_parent: None,
            rst_sent_at: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    #[must_use]
    pub fn counts_toward_concurrency(&self) -> bool {
        !matches!(
            self.state,
            StreamState::Idle | StreamState::Closed | StreamState::ReservedLocal | StreamState::ReservedRemote
        )
    }

    fn log_transition(&self, from: StreamState) {
        if from != self.state {
            trace!("stream {} {:?} -> {:?}", self.id, from, self.state);
        }
    }

    pub fn on_recv_headers(&mut self, end_stream: bool) -> Result<(), StreamError> {
        let from = self.state;
        match self.state {
            StreamState::Idle => self.state = StreamState::Open,
            StreamState::ReservedRemote => self.state = StreamState::HalfClosedLocal,
            StreamState::Open | StreamState::HalfClosedLocal => {
                // trailers or an extra HEADERS block on an already-open stream
            }
            _ => {
                return Err(StreamError::new(
                    Http2ErrorCode::StreamClosed,
                    format!("HEADERS received in state {from:?}"),
                ))
            }
        }
        if end_stream {
            self.on_recv_end_stream()?;
        }
        self.log_transition(from);
        Ok(())
    }

    pub fn on_send_headers(&mut self, end_stream: bool) -> Result<(), StreamError> {
        let from = self.state;
        match self.state {
            StreamState::ReservedLocal => self.state = StreamState::HalfClosedRemote,
            StreamState::Idle => self.state = StreamState::Open,
            StreamState::Open | StreamState::HalfClosedRemote => {}
            _ => {
                return Err(StreamError::new(
                    Http2ErrorCode::StreamClosed,
                    format!("cannot send HEADERS in state {from:?}"),
                ))
            }
        }
        if end_stream {
            self.on_send_end_stream()?;
        }
        self.log_transition(from);
        Ok(())
    }

    pub fn on_recv_end_stream(&mut self) -> Result<(), StreamError> {
        let from = self.state;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
        self.log_transition(from);
        Ok(())
    }

    pub fn on_send_end_stream(&mut self) -> Result<(), StreamError> {
        let from = self.state;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
        self.log_transition(from);
        Ok(())
    }

    pub fn on_reserve_local(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Idle {
            return Err(StreamError::protocol("PUSH_PROMISE on non-idle stream"));
        }
        self.state = StreamState::ReservedLocal;
        Ok(())
    }

    pub fn on_reset(&mut self) -> Result<(), StreamError> {
        if self.state == StreamState::Idle {
            return Err(StreamError::protocol("RST_STREAM on idle stream"));
        }
        self.state = StreamState::Closed;
        self.fail_pending_sends(StreamError::new(Http2ErrorCode::Cancel, "stream reset"));
        Ok(())
    }

    pub fn fail_pending_sends(&mut self, err: StreamError) {
        for pending in self.pending_sends.drain(..) {
            pending.reply.send(Err(err.clone())).ok();
        }
    }

    /// Buffers one fragment of a HEADERS/PUSH_PROMISE/CONTINUATION block.
    /// Call `take_header_block` once END_HEADERS closes the block.
    pub fn push_header_fragment(&mut self, fragment: &[u8]) {
        self.header_block_buffer.extend_from_slice(fragment);
    }

    #[must_use]
    pub fn take_header_block(&mut self) -> Bytes {
        self.header_block_buffer.split().freeze()
    }

    /// Validates a decoded header list per RFC 7540 8.1.2 and records it as
    /// either the request headers or trailers. `is_trailers` distinguishes a
    /// second HEADERS block (after END_STREAM was already seen once) from
    /// the first.
    pub fn ingest_headers(&mut self, headers: Vec<HeaderField>, is_trailers: bool) -> Result<(), StreamError> {
        if is_trailers {
            if headers.iter().any(|h| h.name.starts_with(b":")) {
                return Err(StreamError::protocol("trailers must not contain pseudo-headers"));
            }
            self.trailers = Some(headers);
            return Ok(());
        }

        validate_request_headers(&headers)?;
        if let Some(len) = header_value(&headers, b"content-length") {
            self.content_length = Some(
                len.parse::<u64>()
                    .map_err(|_| StreamError::protocol("invalid content-length"))?,
            );
        }
        self.request_headers = headers;
        self.request_headers_done = true;
        Ok(())
    }

    #[must_use]
    pub fn request_headers_ready(&self) -> bool {
        self.request_headers_done
    }

    /// Accounts inbound DATA against this stream's content-length (if any)
    /// and receive window. `end_stream` is whether this DATA frame itself
    /// carries END_STREAM, which is when the cumulative total is checked.
    /// Returns a stream error on mismatch or overflow.
    pub fn receive_data(&mut self, data: &[u8], end_stream: bool) -> Result<(), StreamError> {
        self.received_data_bytes += data.len() as u64;
        if let Some(expected) = self.content_length {
            if self.received_data_bytes > expected || (end_stream && self.received_data_bytes != expected) {
                return Err(StreamError::protocol("content-length mismatch"));
            }
        }
        self.recv_window.debit(data.len() as u32);
        if self.recv_window.size() < 0 {
            return Err(StreamError::flow_control("DATA exceeded receive window"));
        }
        Ok(())
    }
}

const CONNECTION_SPECIFIC_HEADERS: &[&[u8]] = &[
    b"connection",
    b"keep-alive",
    b"transfer-encoding",
    b"proxy-connection",
    b"upgrade",
];

fn header_value<'a>(headers: &'a [HeaderField], name: &[u8]) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.as_ref() == name)
        .and_then(|h| std::str::from_utf8(h.value.as_ref()).ok())
}

fn validate_request_headers(headers: &[HeaderField]) -> Result<(), StreamError> {
    let mut seen_regular = false;
    let mut method = 0u32;
    let mut scheme = 0u32;
    let mut path = 0u32;

    for field in headers {
        let name = field.name.as_ref();
        if name.iter().any(u8::is_ascii_uppercase) {
            return Err(StreamError::protocol("header names must be lowercase"));
        }
        if name.starts_with(b":") {
            if seen_regular {
                return Err(StreamError::protocol("pseudo-headers must precede regular headers"));
            }
            match name {
                b":method" => method += 1,
                b":scheme" => scheme += 1,
                b":path" => {
                    path += 1;
                    if field.value.is_empty() {
                        return Err(StreamError::protocol(":path must not be empty"));
                    }
                }
                b":authority" => {}
                other => {
                    return Err(StreamError::protocol(format!(
                        "unrecognized pseudo-header {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            }
        } else {
            seen_regular = true;
            if CONNECTION_SPECIFIC_HEADERS.contains(&name) {
                return Err(StreamError::protocol(format!(
                    "connection-specific header {} is forbidden",
                    String::from_utf8_lossy(name)
                )));
            }
            if name == b"te" && field.value.as_ref() != b"trailers" {
                return Err(StreamError::protocol("te header must equal \"trailers\""));
            }
        }
    }

    if method != 1 {
        return Err(StreamError::protocol("exactly one :method pseudo-header is required"));
    }
    if scheme != 1 {
        return Err(StreamError::protocol("exactly one :scheme pseudo-header is required"));
    }
    if path != 1 {
        return Err(StreamError::protocol(":path pseudo-header is required"));
    }
    Ok(())
}
