//! Glue between an already-negotiated byte-stream socket and a `Connection`.
//! Owns the read buffer and the framing loop; the acceptor that produced the
//! socket is expected to have already done TLS/ALPN negotiation or accepted
//! prior-knowledge h2 — this module only speaks the wire protocol from the
//! connection preface onward.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::{Http2ErrorCode, TransportError};
use crate::frame::{Deserialized, Frame};
use crate::handler::Handler;
use anyhow::Context as _;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Reads and validates the 24-byte client connection preface. Any mismatch
/// is a transport-level failure — there is no peer to answer with GOAWAY
/// since we do not yet know it speaks HTTP/2 correctly.
pub async fn read_preface<R: AsyncRead + Unpin>(socket: &mut R) -> Result<(), TransportError> {
    let mut buf = [0u8; 24];
    socket.read_exact(&mut buf).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(err)
        }
    })?;
    if buf != *CLIENT_PREFACE {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "client preface mismatch",
        )));
    }
    Ok(())
}

/// Drives one connection end to end: reads the preface, then alternates
/// between socket reads, handler-task messages, and flushing queued
/// outbound frames until the peer goes away or a connection error forces a
/// GOAWAY and close. Mirrors the teacher crate's read/dispatch/write loop,
/// reshaped around `tokio::select!` instead of OS threads.
pub async fn handle_connection<S>(mut socket: S, config: Config, handler: Arc<dyn Handler>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    read_preface(&mut socket).await.context("reading client preface")?;

    let (mut connection, _sender) = Connection::new(config, handler);
    connection.init();
    flush_outbound(&mut socket, &mut connection).await?;

    let mut read_buf: Vec<u8> = Vec::with_capacity(16 * 1024);
    let mut scratch = [0u8; 16 * 1024];
    let read_timeout = connection.read_timeout();

    loop {
        match next_frame(&mut read_buf, connection.local_settings().max_frame_size) {
            Ok(Some(frame)) => {
                if let Err(err) = connection.handle_frame(frame).await {
                    error!("connection error: {err}");
                    connection.shutdown_connection(err.code, err.reason.clone());
                    flush_outbound(&mut socket, &mut connection).await?;
                    return Ok(());
                }
                flush_outbound(&mut socket, &mut connection).await?;
                continue;
            }
            Err(err) => {
                error!("frame codec error: {err}");
                connection.shutdown_connection(err.code, err.reason.clone());
                flush_outbound(&mut socket, &mut connection).await?;
                return Ok(());
            }
            Ok(None) => {}
        }

        tokio::select! {
            msg = connection.next_to_connection() => {
                if let Some(msg) = msg {
                    connection.handle_to_connection(msg).await;
                    flush_outbound(&mut socket, &mut connection).await?;
                }
            }
            read = timeout(read_timeout, socket.read(&mut scratch)) => {
                match read {
                    Ok(Ok(0)) => {
                        debug!("peer closed the socket");
                        return Ok(());
                    }
                    Ok(Ok(n)) => read_buf.extend_from_slice(&scratch[..n]),
                    Ok(Err(err)) => return Err(TransportError::Io(err).into()),
                    Err(_) => {
                        warn!("read timed out after {read_timeout:?}, sending GOAWAY");
                        connection.shutdown_connection(Http2ErrorCode::NoError, "read timeout");
                        flush_outbound(&mut socket, &mut connection).await?;
                        return Ok(());
                    }
                }
            }
        }

        if connection.is_draining() && !connection.has_active_streams() {
            debug!("drained all streams after GOAWAY, closing");
            return Ok(());
        }
    }
}

fn next_frame(buf: &mut Vec<u8>, max_frame_size: u32) -> Result<Option<Frame>, crate::error::ConnectionError> {
    match Frame::deserialize(buf, max_frame_size)? {
        Deserialized::Frame { frame, consumed } => {
            buf.drain(..consumed);
            Ok(Some(frame))
        }
        Deserialized::NeedMore => Ok(None),
    }
}

async fn flush_outbound<S: AsyncWrite + Unpin>(socket: &mut S, connection: &mut Connection) -> anyhow::Result<()> {
    for frame in connection.take_outbound() {
        let [header, payload] = frame.serialize();
        if header.is_empty() {
            continue;
        }
        socket.write_all(&header).await.context("writing frame header")?;
        if !payload.is_empty() {
            socket.write_all(&payload).await.context("writing frame payload")?;
        }
    }
    socket.flush().await.context("flushing socket")?;
    Ok(())
}

/// Called by an acceptor that wants to shut a connection down out-of-band
/// (e.g. process shutdown), rather than in response to a protocol error.
pub async fn handle_shutdown<S: AsyncWrite + Unpin>(socket: &mut S, connection: &mut Connection) -> anyhow::Result<()> {
    connection.shutdown_connection(Http2ErrorCode::NoError, "server shutting down");
    flush_outbound(socket, connection).await?;
    tokio::time::sleep(connection.drain_deadline()).await;
    Ok(())
}
