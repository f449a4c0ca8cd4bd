use crate::error::{ConnectionError, Http2ErrorCode};
use crate::flags::*;
use crate::settings::{SettingsParameter, MAX_FRAME_SIZE_CEILING};
use bytes::Bytes;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

pub type StreamId = u32;

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

const FRAME_HEADER_LEN: usize = 9;
const STREAM_ID_MASK: u32 = u32::MAX >> 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityFields {
    pub dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PriorityFields>,
        fragment: Bytes,
    },
    Priority {
        stream_id: StreamId,
        priority: PriorityFields,
    },
    ResetStream {
        stream_id: StreamId,
        error: Http2ErrorCode,
    },
    Settings {
        ack: bool,
        params: Vec<(SettingsParameter, u32)>,
    },
    PushPromise {
        stream_id: StreamId,
        end_headers: bool,
        promised_stream_id: StreamId,
        fragment: Bytes,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error: Http2ErrorCode,
        debug: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        end_headers: bool,
        fragment: Bytes,
    },
    /// Unrecognized frame type; discarded without error (RFC 7540 5.5).
    Unknown {
        frame_type: u8,
        stream_id: StreamId,
    },
}

/// Outcome of a single `Frame::deserialize` call against a byte buffer that
/// may hold zero, one, or many frames back-to-back.
pub enum Deserialized {
    /// A complete frame was parsed; `consumed` bytes should be dropped from
    /// the front of the caller's buffer before the next call.
    Frame { frame: Frame, consumed: usize },
    /// Fewer than a full frame is buffered; call again once more bytes
    /// arrive from the transport.
    NeedMore,
}

impl Frame {
    pub fn deserialize(buf: &[u8], max_frame_size: u32) -> Result<Deserialized, ConnectionError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(Deserialized::NeedMore);
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        if length > max_frame_size {
            return Err(ConnectionError::frame_size(format!(
                "frame length {length} exceeds max_frame_size {max_frame_size}"
            )));
        }
        let total = FRAME_HEADER_LEN + length as usize;
        if buf.len() < total {
            return Ok(Deserialized::NeedMore);
        }

        let frame_type = buf[3];
        let flags = buf[4];
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & STREAM_ID_MASK;
        let payload = &buf[FRAME_HEADER_LEN..total];

        let frame = match FrameType::from_u8(frame_type) {
            Some(FrameType::Data) => parse_data(stream_id, flags, payload)?,
            Some(FrameType::Headers) => parse_headers(stream_id, flags, payload)?,
            Some(FrameType::Priority) => parse_priority(stream_id, payload)?,
            Some(FrameType::ResetStream) => parse_reset_stream(stream_id, payload)?,
            Some(FrameType::Settings) => parse_settings(flags, payload)?,
            Some(FrameType::PushPromise) => parse_push_promise(stream_id, flags, payload)?,
            Some(FrameType::Ping) => parse_ping(stream_id, flags, payload)?,
            Some(FrameType::GoAway) => parse_goaway(stream_id, payload)?,
            Some(FrameType::WindowUpdate) => parse_window_update(stream_id, payload)?,
            Some(FrameType::Continuation) => parse_continuation(stream_id, flags, payload)?,
            None => Frame::Unknown {
                frame_type,
                stream_id,
            },
        };

        Ok(Deserialized::Frame {
            frame,
            consumed: total,
        })
    }

    /// Serializes into a `[header, payload]` pair suitable for vectored
    /// write; the header always carries the true payload length.
    #[must_use]
    pub fn serialize(&self) -> [Vec<u8>; 2] {
        let (frame_type, flags, stream_id, payload) = match self {
            Frame::Data {
                stream_id,
                end_stream,
                data,
            } => {
                let mut flags = DataFlags::empty();
                if *end_stream {
                    flags |= DataFlags::END_STREAM;
                }
                (FrameType::Data, flags.bits(), *stream_id, data.to_vec())
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
            } => {
                let mut flags = HeadersFlags::empty();
                if *end_stream {
                    flags |= HeadersFlags::END_STREAM;
                }
                if *end_headers {
                    flags |= HeadersFlags::END_HEADERS;
                }
                let mut payload = Vec::with_capacity(fragment.len() + 5);
                if let Some(p) = priority {
                    flags |= HeadersFlags::PRIORITY;
                    let dep = p.dependency | if p.exclusive { 1 << 31 } else { 0 };
                    payload.extend(dep.to_be_bytes());
                    payload.push(p.weight);
                }
                payload.extend_from_slice(fragment);
                (FrameType::Headers, flags.bits(), *stream_id, payload)
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                let dep = priority.dependency | if priority.exclusive { 1 << 31 } else { 0 };
                let mut payload = Vec::with_capacity(5);
                payload.extend(dep.to_be_bytes());
                payload.push(priority.weight);
                (FrameType::Priority, 0, *stream_id, payload)
            }
            Frame::ResetStream { stream_id, error } => {
                let payload = error.to_u32().unwrap_or(0).to_be_bytes().to_vec();
                (FrameType::ResetStream, 0, *stream_id, payload)
            }
            Frame::Settings { ack, params } => {
                let flags = if *ack { SettingsFlags::ACK.bits() } else { 0 };
                let mut payload = Vec::with_capacity(params.len() * 6);
                for (param, value) in params {
                    payload.extend((*param as u16).to_be_bytes());
                    payload.extend(value.to_be_bytes());
                }
                (FrameType::Settings, flags, 0, payload)
            }
            Frame::PushPromise {
                stream_id,
                end_headers,
                promised_stream_id,
                fragment,
            } => {
                let mut flags = PushPromiseFlags::empty();
                if *end_headers {
                    flags |= PushPromiseFlags::END_HEADERS;
                }
                let mut payload = Vec::with_capacity(fragment.len() + 4);
                payload.extend((*promised_stream_id & STREAM_ID_MASK).to_be_bytes());
                payload.extend_from_slice(fragment);
                (FrameType::PushPromise, flags.bits(), *stream_id, payload)
            }
            Frame::Ping { ack, payload } => {
                let flags = if *ack { PingFlags::ACK.bits() } else { 0 };
                (FrameType::Ping, flags, 0, payload.to_vec())
            }
            Frame::GoAway {
                last_stream_id,
                error,
                debug,
            } => {
                let mut payload = Vec::with_capacity(8 + debug.len());
                payload.extend((*last_stream_id & STREAM_ID_MASK).to_be_bytes());
                payload.extend(error.to_u32().unwrap_or(0).to_be_bytes());
                payload.extend_from_slice(debug);
                (FrameType::GoAway, 0, 0, payload)
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                let payload = (*increment & STREAM_ID_MASK).to_be_bytes().to_vec();
                (FrameType::WindowUpdate, 0, *stream_id, payload)
            }
            Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => {
                let flags = if *end_headers {
                    ContinuationFlags::END_HEADERS.bits()
                } else {
                    0
                };
                (FrameType::Continuation, flags, *stream_id, fragment.to_vec())
            }
            Frame::Unknown { .. } => {
                // never constructed by us for outbound traffic
                return [Vec::new(), Vec::new()];
            }
        };

        let mut header = Vec::with_capacity(FRAME_HEADER_LEN);
        header.extend(&payload.len().to_be_bytes()[5..8]);
        header.push(frame_type.to_u8().expect("FrameType is repr(u8)"));
        header.push(flags);
        header.extend((stream_id & STREAM_ID_MASK).to_be_bytes());
        [header, payload]
    }
}

fn require_nonzero_stream(stream_id: StreamId, what: &str) -> Result<(), ConnectionError> {
    if stream_id == 0 {
        return Err(ConnectionError::protocol(format!(
            "{what} frame must not use stream id 0"
        )));
    }
    Ok(())
}

fn require_zero_stream(stream_id: StreamId, what: &str) -> Result<(), ConnectionError> {
    if stream_id != 0 {
        return Err(ConnectionError::protocol(format!(
            "{what} frame must use stream id 0"
        )));
    }
    Ok(())
}

/// Strips PADDED-flag padding: first payload octet is the pad length, and
/// that many octets must be present at the tail. Their content is ignored.
fn strip_padding<'a>(payload: &'a [u8], padded: bool, what: &str) -> Result<&'a [u8], ConnectionError> {
    if !padded {
        return Ok(payload);
    }
    let Some(&pad_len) = payload.first() else {
        return Err(ConnectionError::frame_size(format!(
            "{what} PADDED but payload is empty"
        )));
    };
    let pad_len = pad_len as usize;
    let rest = &payload[1..];
    if rest.len() < pad_len {
        return Err(ConnectionError::frame_size(format!(
            "{what} pad length {pad_len} exceeds remaining payload"
        )));
    }
    Ok(&rest[..rest.len() - pad_len])
}

fn parse_data(stream_id: StreamId, flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "DATA")?;
    let flags = DataFlags::from_bits_truncate(flags);
    let data = strip_padding(payload, flags.contains(DataFlags::PADDED), "DATA")?;
    Ok(Frame::Data {
        stream_id,
        end_stream: flags.contains(DataFlags::END_STREAM),
        data: Bytes::copy_from_slice(data),
    })
}

fn parse_headers(stream_id: StreamId, flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "HEADERS")?;
    let flags = HeadersFlags::from_bits_truncate(flags);
    let body = strip_padding(payload, flags.contains(HeadersFlags::PADDED), "HEADERS")?;
    let mut rest = body;
    let priority = if flags.contains(HeadersFlags::PRIORITY) {
        if rest.len() < 5 {
            return Err(ConnectionError::frame_size("HEADERS PRIORITY requires 5 bytes"));
        }
        let raw = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let exclusive = raw & (1 << 31) != 0;
        let dependency = raw & STREAM_ID_MASK;
        let weight = rest[4];
        rest = &rest[5..];
        Some(PriorityFields {
            dependency,
            exclusive,
            weight,
        })
    } else {
        None
    };
    Ok(Frame::Headers {
        stream_id,
        end_stream: flags.contains(HeadersFlags::END_STREAM),
        end_headers: flags.contains(HeadersFlags::END_HEADERS),
        priority,
        fragment: Bytes::copy_from_slice(rest),
    })
}

fn parse_priority(stream_id: StreamId, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "PRIORITY")?;
    if payload.len() != 5 {
        return Err(ConnectionError::frame_size("PRIORITY must be exactly 5 bytes"));
    }
    let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Frame::Priority {
        stream_id,
        priority: PriorityFields {
            dependency: raw & STREAM_ID_MASK,
            exclusive: raw & (1 << 31) != 0,
            weight: payload[4],
        },
    })
}

fn parse_reset_stream(stream_id: StreamId, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "RST_STREAM")?;
    if payload.len() != 4 {
        return Err(ConnectionError::frame_size("RST_STREAM must be exactly 4 bytes"));
    }
    let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Frame::ResetStream {
        stream_id,
        error: Http2ErrorCode::from_wire(code),
    })
}

fn parse_settings(flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    let ack = SettingsFlags::from_bits_truncate(flags).contains(SettingsFlags::ACK);
    if ack && !payload.is_empty() {
        return Err(ConnectionError::frame_size("SETTINGS ACK must carry no payload"));
    }
    if payload.len() % 6 != 0 {
        return Err(ConnectionError::frame_size(
            "SETTINGS payload length must be a multiple of 6",
        ));
    }
    let mut params = Vec::with_capacity(payload.len() / 6);
    for chunk in payload.chunks_exact(6) {
        let id = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        if let Some(param) = SettingsParameter::from_wire(id) {
            if param == SettingsParameter::MaxFrameSize
                && !(16_384..=MAX_FRAME_SIZE_CEILING).contains(&value)
            {
                return Err(ConnectionError::protocol(
                    "SETTINGS_MAX_FRAME_SIZE out of [16384, 16777215]",
                ));
            }
            if param == SettingsParameter::EnablePush && value > 1 {
                return Err(ConnectionError::protocol("SETTINGS_ENABLE_PUSH must be 0 or 1"));
            }
            if param == SettingsParameter::InitialWindowSize
                && value > crate::flow_control::MAX_WINDOW_SIZE
            {
                return Err(ConnectionError::flow_control(
                    "SETTINGS_INITIAL_WINDOW_SIZE exceeds 2^31-1",
                ));
            }
            params.push((param, value));
        }
    }
    Ok(Frame::Settings { ack, params })
}

fn parse_push_promise(stream_id: StreamId, flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "PUSH_PROMISE")?;
    let flags = PushPromiseFlags::from_bits_truncate(flags);
    let body = strip_padding(payload, flags.contains(PushPromiseFlags::PADDED), "PUSH_PROMISE")?;
    if body.len() < 4 {
        return Err(ConnectionError::frame_size("PUSH_PROMISE missing promised stream id"));
    }
    let promised_stream_id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) & STREAM_ID_MASK;
    Ok(Frame::PushPromise {
        stream_id,
        end_headers: flags.contains(PushPromiseFlags::END_HEADERS),
        promised_stream_id,
        fragment: Bytes::copy_from_slice(&body[4..]),
    })
}

fn parse_ping(stream_id: StreamId, flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_zero_stream(stream_id, "PING")?;
    if payload.len() != 8 {
        return Err(ConnectionError::frame_size("PING must be exactly 8 bytes"));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(payload);
    Ok(Frame::Ping {
        ack: PingFlags::from_bits_truncate(flags).contains(PingFlags::ACK),
        payload: buf,
    })
}

fn parse_goaway(stream_id: StreamId, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_zero_stream(stream_id, "GOAWAY")?;
    if payload.len() < 8 {
        return Err(ConnectionError::frame_size("GOAWAY requires at least 8 bytes"));
    }
    let last_stream_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & STREAM_ID_MASK;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok(Frame::GoAway {
        last_stream_id,
        error: Http2ErrorCode::from_wire(code),
        debug: Bytes::copy_from_slice(&payload[8..]),
    })
}

fn parse_window_update(stream_id: StreamId, payload: &[u8]) -> Result<Frame, ConnectionError> {
    if payload.len() != 4 {
        return Err(ConnectionError::frame_size("WINDOW_UPDATE must be exactly 4 bytes"));
    }
    let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & STREAM_ID_MASK;
    // A zero increment is a PROTOCOL_ERROR (RFC 7540 6.9.1), but whether that is
    // connection-fatal or scoped to one stream depends on `stream_id`, which only
    // `Connection::handle_window_update` is in a position to judge.
    Ok(Frame::WindowUpdate {
        stream_id,
        increment,
    })
}

fn parse_continuation(stream_id: StreamId, flags: u8, payload: &[u8]) -> Result<Frame, ConnectionError> {
    require_nonzero_stream(stream_id, "CONTINUATION")?;
    Ok(Frame::Continuation {
        stream_id,
        end_headers: ContinuationFlags::from_bits_truncate(flags).contains(ContinuationFlags::END_HEADERS),
        fragment: Bytes::copy_from_slice(payload),
    })
}
