//! The boundary between the connection task and one handler task per
//! stream. Handler tasks never touch HPACK state or flow-control windows
//! directly — they exchange typed messages with the connection task over a
//! channel, the async analogue of the teacher crate's request-queue thread.

use crate::error::StreamError;
use crate::frame::StreamId;
use crate::hpack::HeaderField;
use bytes::Bytes;
use log::warn;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("connection is closed")]
    ConnectionClosed,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// A fully assembled inbound request: decoded headers plus a channel the
/// handler task reads DATA chunks from as they arrive.
pub struct Request {
    pub headers: Vec<HeaderField>,
    pub content_length: Option<u64>,
    body_rx: mpsc::Receiver<Bytes>,
}

impl Request {
    #[must_use]
    pub fn new(headers: Vec<HeaderField>, content_length: Option<u64>, body_rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            headers,
            content_length,
            body_rx,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.as_ref() == name.as_bytes())
            .and_then(|h| std::str::from_utf8(h.value.as_ref()).ok())
    }

    /// Suspends until the next DATA chunk arrives, or `None` once the
    /// connection task has observed END_STREAM and dropped the sender.
    pub async fn receive_body(&mut self) -> Option<Bytes> {
        self.body_rx.recv().await
    }
}

/// A message a handler task sends to the connection task. Every variant
/// that expects a reply carries its own oneshot so the connection task
/// never has to correlate requests out-of-band.
pub enum ToConnection {
    SendHeaders {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
        reply: oneshot::Sender<Result<(), StreamError>>,
    },
    SendData {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
        reply: oneshot::Sender<Result<(), StreamError>>,
    },
    SendPush {
        parent_stream_id: StreamId,
        headers: Vec<HeaderField>,
        reply: oneshot::Sender<Result<StreamId, StreamError>>,
    },
    StreamTerminated {
        stream_id: StreamId,
        outcome: TerminationOutcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The handler finished normally; any queued sends should drain as NO_ERROR.
    Normal,
    /// The handler panicked or returned an error; RST_STREAM(INTERNAL_ERROR).
    Failed,
}

/// What a handler task uses to talk back to the connection task for one
/// stream. Cheap to clone; every call is a message-send-then-await-reply.
#[derive(Clone)]
pub struct StreamHandle {
    stream_id: StreamId,
    to_connection: mpsc::Sender<ToConnection>,
}

impl StreamHandle {
    #[must_use]
    pub fn new(stream_id: StreamId, to_connection: mpsc::Sender<ToConnection>) -> Self {
        Self {
            stream_id,
            to_connection,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub async fn send_headers(&self, headers: Vec<HeaderField>, end_stream: bool) -> Result<(), HandlerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_connection
            .send(ToConnection::SendHeaders {
                stream_id: self.stream_id,
                headers,
                end_stream,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?;
        reply_rx
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?
            .map_err(HandlerError::from)
    }

    /// Suspends until the connection task has admitted (or permanently
    /// failed) this write under flow control. This is the backpressure
    /// point: a handler task that writes faster than the peer reads simply
    /// stays suspended here.
    pub async fn send_data(&self, data: Bytes, end_stream: bool) -> Result<(), HandlerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_connection
            .send(ToConnection::SendData {
                stream_id: self.stream_id,
                data,
                end_stream,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?;
        reply_rx
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?
            .map_err(HandlerError::from)
    }

    pub async fn send_push(&self, headers: Vec<HeaderField>) -> Result<StreamId, HandlerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.to_connection
            .send(ToConnection::SendPush {
                parent_stream_id: self.stream_id,
                headers,
                reply: reply_tx,
            })
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?;
        reply_rx
            .await
            .map_err(|_| HandlerError::ConnectionClosed)?
            .map_err(HandlerError::from)
    }

    async fn notify_terminated(&self, outcome: TerminationOutcome) {
        self.to_connection
            .send(ToConnection::StreamTerminated {
                stream_id: self.stream_id,
                outcome,
            })
            .await
            .ok();
    }
}

/// User-supplied request-processing callable, run as one task per stream.
/// Boxed-future form avoids pulling in an `async-trait` dependency while
/// still letting implementors write an ordinary `async fn`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, handle: StreamHandle) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request, StreamHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, request: Request, handle: StreamHandle) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
        Box::pin(self(request, handle))
    }
}

/// Spawns the handler task for one stream. On normal return, signals
/// `TerminationOutcome::Normal`; on an `Err` return or a panic caught by the
/// join, signals `TerminationOutcome::Failed`, which the connection task
/// answers with RST_STREAM(INTERNAL_ERROR).
pub fn spawn(handler: Arc<dyn Handler>, request: Request, handle: StreamHandle) -> tokio::task::JoinHandle<()> {
    let notify_handle = handle.clone();
    tokio::spawn(async move {
        let inner = tokio::spawn(handler.call(request, handle));
        let outcome = match inner.await {
            Ok(Ok(())) => TerminationOutcome::Normal,
            Ok(Err(err)) => {
                warn!("handler task for stream {} returned an error: {err:#}", notify_handle.stream_id());
                TerminationOutcome::Failed
            }
            Err(join_err) => {
                warn!("handler task for stream {} panicked: {join_err}", notify_handle.stream_id());
                TerminationOutcome::Failed
            }
        };
        notify_handle.notify_terminated(outcome).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (StreamHandle, mpsc::Receiver<ToConnection>) {
        let (tx, rx) = mpsc::channel(8);
        (StreamHandle::new(1, tx), rx)
    }

    #[tokio::test]
    async fn request_header_is_case_sensitive_on_stored_name() {
        let (_body_tx, body_rx) = mpsc::channel(1);
        let request = Request::new(vec![HeaderField::new(b":method".to_vec(), b"GET".to_vec())], None, body_rx);
        assert_eq!(request.header(":method"), Some("GET"));
        assert_eq!(request.header(":path"), None);
    }

    #[tokio::test]
    async fn receive_body_ends_when_sender_drops() {
        let (body_tx, body_rx) = mpsc::channel(1);
        let mut request = Request::new(vec![], None, body_rx);
        body_tx.send(Bytes::from_static(b"chunk")).await.unwrap();
        drop(body_tx);
        assert_eq!(request.receive_body().await, Some(Bytes::from_static(b"chunk")));
        assert_eq!(request.receive_body().await, None);
    }

    #[tokio::test]
    async fn send_headers_reports_connection_closed_once_receiver_is_gone() {
        let (handle, rx) = handle();
        drop(rx);
        let err = handle.send_headers(vec![], true).await.unwrap_err();
        assert_eq!(err, HandlerError::ConnectionClosed);
    }

    #[tokio::test]
    async fn spawn_reports_failed_outcome_on_panic() {
        let (to_connection_tx, mut rx) = mpsc::channel(8);
        let (_body_tx, body_rx) = mpsc::channel(1);
        let request = Request::new(vec![], None, body_rx);
        let handle = StreamHandle::new(3, to_connection_tx);
        let panicking: Arc<dyn Handler> = Arc::new(|_req: Request, _handle: StreamHandle| async move { panic!("boom") });
        spawn(panicking, request, handle).await.unwrap();
        match rx.recv().await {
            Some(ToConnection::StreamTerminated { stream_id, outcome }) => {
                assert_eq!(stream_id, 3);
                assert_eq!(outcome, TerminationOutcome::Failed);
            }
            other => panic!("unexpected message: {}", other.is_some()),
        }
    }
}
