//! The connection task's protocol state: settings, HPACK contexts, both
//! flow-control windows, and the stream registry. Everything here is
//! confined to a single task — no field is ever touched from anywhere else,
//! which is what lets the HPACK table and the windows go unlocked.

use crate::config::Config;
use crate::error::{ConnectionError, DispatchError, Http2ErrorCode, StreamError};
use crate::flow_control::Window;
use crate::frame::{Frame, PriorityFields, StreamId};
use crate::handler::{Handler, Request, StreamHandle, TerminationOutcome, ToConnection};
use crate::hpack::{self, HeaderField};
use crate::registry::StreamRegistry;
use crate::settings::{Settings, SettingsParameter};
use crate::stream::{Initiator, StreamState};
use bytes::Bytes;
use log::{debug, trace, warn};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

/// How much of a stream's (or the connection's) receive window can drain
/// before we top it back up with a WINDOW_UPDATE. Half the initial window
/// is a common, conservative choice that keeps update frequency low without
/// ever letting the peer stall on an empty window.
const WINDOW_UPDATE_THRESHOLD_DIVISOR: i64 = 2;

/// Bound on the per-stream inbound body channel. Large enough that a
/// handler reading in bursts rarely blocks the connection task, small
/// enough that a handler that never reads can't let memory grow unbounded
/// — flow control alone would still let the peer keep sending.
const BODY_CHANNEL_CAPACITY: usize = 64;

pub struct Connection {
    config: Config,
    local_settings: Settings,
    remote_settings: Settings,
    hpack: hpack::Context,
    send_window: Window,
    recv_window: Window,
    registry: StreamRegistry,
    handler: Arc<dyn Handler>,
    to_connection_tx: mpsc::Sender<ToConnection>,
    to_connection_rx: mpsc::Receiver<ToConnection>,

    first_frame_seen: bool,
    expect_continuation: Option<StreamId>,
    handlers_spawned: BTreeSet<StreamId>,
    goaway_sent: bool,
    goaway_received: bool,
    last_processed_stream_id: StreamId,
    outbound: VecDeque<Frame>,
}

impl Connection {
    /// Builds a connection in its pre-handshake state and returns the
    /// sender side handler tasks use to talk back. Call `init` once to
    /// queue the server's opening SETTINGS frame before driving any reads.
    #[must_use]
    pub fn new(config: Config, handler: Arc<dyn Handler>) -> (Self, mpsc::Sender<ToConnection>) {
        let (to_connection_tx, to_connection_rx) = mpsc::channel(256);
        let conn = Self {
            local_settings: config.local_settings,
            remote_settings: Settings::default(),
            hpack: hpack::Context::new(),
            send_window: Window::default(),
            recv_window: Window::new(i64::from(config.local_settings.initial_window_size)),
            registry: StreamRegistry::new(config.local_settings.max_concurrent_streams),
            handler,
            to_connection_tx: to_connection_tx.clone(),
            to_connection_rx,
            config,
            first_frame_seen: false,
            expect_continuation: None,
            handlers_spawned: BTreeSet::new(),
            goaway_sent: false,
            goaway_received: false,
            last_processed_stream_id: 0,
            outbound: VecDeque::new(),
        };
        (conn, to_connection_tx)
    }

    /// Suspends until a handler task sends the connection task a message.
    /// `None` only once every `StreamHandle`/sender clone has been dropped.
    pub async fn next_to_connection(&mut self) -> Option<ToConnection> {
        self.to_connection_rx.recv().await
    }

    /// Queues the opening SETTINGS frame. The peer's ACK is logged when it
    /// arrives but does not gate any further behavior: our own limits
    /// (decoder table size, concurrency bookkeeping) are already in effect
    /// locally the moment we decide to advertise them.
    pub fn init(&mut self) {
        let s = &self.local_settings;
        let params = vec![
            (SettingsParameter::HeaderTableSize, s.header_table_size),
            (SettingsParameter::EnablePush, u32::from(s.enable_push)),
            (SettingsParameter::MaxConcurrentStreams, s.max_concurrent_streams),
            (SettingsParameter::InitialWindowSize, s.initial_window_size),
            (SettingsParameter::MaxFrameSize, s.max_frame_size),
            (SettingsParameter::MaxHeaderListSize, s.max_header_list_size),
        ];
        self.hpack.decoder.set_max_allowed_table_size(s.header_table_size as usize);
        self.outbound.push_back(Frame::Settings { ack: false, params });
    }

    #[must_use]
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.goaway_sent
    }

    #[must_use]
    pub fn has_active_streams(&self) -> bool {
        self.registry.active_count(Initiator::Client) > 0 || self.registry.active_count(Initiator::Server) > 0
    }

    /// Drains frames queued for the transport to write, in the order they
    /// were produced.
    pub fn take_outbound(&mut self) -> Vec<Frame> {
        self.outbound.drain(..).collect()
    }

    /// Dispatches one inbound frame. A connection error is fatal to the
    /// whole connection (caller must emit GOAWAY and stop reading); a
    /// stream error has already been answered with RST_STREAM internally
    /// and the connection continues.
    pub async fn handle_frame(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if !self.first_frame_seen {
            self.first_frame_seen = true;
            if !matches!(frame, Frame::Settings { ack: false, .. }) {
                return Err(ConnectionError::protocol("first frame on the connection must be SETTINGS"));
            }
        }

        if let Some(expected) = self.expect_continuation {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == expected => {}
                _ => return Err(ConnectionError::protocol("expected a CONTINUATION frame")),
            }
        }

        let result = match frame {
            Frame::Data { stream_id, end_stream, data } => self.handle_data(stream_id, end_stream, data).await,
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
            } => self.handle_headers(stream_id, end_stream, end_headers, priority, fragment).await,
            Frame::Priority { stream_id, priority } => self.handle_priority(stream_id, priority),
            Frame::ResetStream { stream_id, error } => self.handle_reset_stream(stream_id, error),
            Frame::Settings { ack, params } => self.handle_settings(ack, params),
            Frame::PushPromise { stream_id, .. } => Err(DispatchError::Connection(ConnectionError::protocol(format!(
                "client must not send PUSH_PROMISE (stream {stream_id})"
            )))),
            Frame::Ping { ack, payload } => {
                self.handle_ping(ack, payload);
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error,
                debug,
            } => {
                self.handle_goaway(last_stream_id, error, debug);
                Ok(())
            }
            Frame::WindowUpdate { stream_id, increment } => self.handle_window_update(stream_id, increment).await,
            Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => self.handle_continuation(stream_id, end_headers, fragment).await,
            Frame::Unknown { frame_type, stream_id } => {
                trace!("ignoring unknown frame type {frame_type:#x} on stream {stream_id}");
                Ok(())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(DispatchError::Connection(err)) => Err(err),
            Err(DispatchError::Stream(err)) => {
                // unreachable in practice: every stream-error path below
                // answers RST_STREAM itself rather than bubbling here, but
                // keep the fallback for defense against a missed call site.
                warn!("unanswered stream error: {err}");
                Ok(())
            }
        }
    }

    /// Handles a message a handler task sent over its channel back to the
    /// connection task (the outbound half of the protocol).
    pub async fn handle_to_connection(&mut self, msg: ToConnection) {
        match msg {
            ToConnection::SendHeaders {
                stream_id,
                headers,
                end_stream,
                reply,
            } => {
                let result = self.send_headers(stream_id, headers, end_stream);
                reply.send(result).ok();
            }
            ToConnection::SendData {
                stream_id,
                data,
                end_stream,
                reply,
            } => self.queue_or_send_data(stream_id, data, end_stream, reply),
            ToConnection::SendPush {
                parent_stream_id,
                headers,
                reply,
            } => {
                let result = self.send_push(parent_stream_id, headers);
                reply.send(result).ok();
            }
            ToConnection::StreamTerminated { stream_id, outcome } => self.stream_terminated(stream_id, outcome),
        }
    }

    // ---- inbound frame handlers ----

    async fn handle_data(&mut self, stream_id: StreamId, end_stream: bool, data: Bytes) -> Result<(), DispatchError> {
        self.recv_window.debit(data.len() as u32);
        if self.recv_window.size() < 0 {
            return Err(ConnectionError::flow_control("DATA exceeded connection receive window").into());
        }

        let Some(stream) = self.registry.get_mut(stream_id) else {
            return Err(ConnectionError::protocol("DATA on a stream that was never opened").into());
        };
        if let Err(err) = stream.receive_data(&data, end_stream) {
            self.reset_stream(stream_id, err.code);
            return Ok(());
        }

        if let Some(tx) = self.registry.get(stream_id).and_then(|s| s.body_tx.clone()) {
            if tx.send(data).await.is_err() {
                trace!("handler for stream {stream_id} dropped its body receiver");
            }
        }

        if end_stream {
            if let Some(stream) = self.registry.get_mut(stream_id) {
                stream.on_recv_end_stream()?;
                stream.body_tx = None;
            }
        }

        self.maybe_refill_windows(stream_id);
        self.registry.remove_if_closed(stream_id);
        Ok(())
    }

    async fn handle_headers(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PriorityFields>,
        fragment: Bytes,
    ) -> Result<(), DispatchError> {
        let _ = priority; // stream prioritization is advisory and not implemented
        if stream_id % 2 == 0 {
            return Err(ConnectionError::protocol("client used an even-numbered stream id").into());
        }
        if self.registry.get(stream_id).is_none() && self.registry.at_concurrency_limit(Initiator::Client) {
            self.outbound.push_back(Frame::ResetStream {
                stream_id,
                error: Http2ErrorCode::RefusedStream,
            });
            return Ok(());
        }

        let stream = self.registry.insert_or_get_peer(
            stream_id,
            i64::from(self.remote_settings.initial_window_size),
            i64::from(self.local_settings.initial_window_size),
        )?;
        stream.on_recv_headers(end_stream)?;
        stream.push_header_fragment(&fragment);
        self.last_processed_stream_id = self.last_processed_stream_id.max(stream_id);

        if end_headers {
            self.finish_header_block(stream_id).await?;
        } else {
            self.expect_continuation = Some(stream_id);
        }
        Ok(())
    }

    async fn handle_continuation(&mut self, stream_id: StreamId, end_headers: bool, fragment: Bytes) -> Result<(), DispatchError> {
        let stream = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| ConnectionError::protocol("CONTINUATION on unknown stream"))?;
        stream.push_header_fragment(&fragment);
        if end_headers {
            self.expect_continuation = None;
            self.finish_header_block(stream_id).await?;
        }
        Ok(())
    }

    /// Decodes the now-complete header block and either dispatches a new
    /// handler task (first non-trailer block) or records trailers. HPACK
    /// decode failures are connection-fatal regardless of the owning
    /// stream's state, per RFC 7541 4.2.
    async fn finish_header_block(&mut self, stream_id: StreamId) -> Result<(), DispatchError> {
        let block = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| ConnectionError::protocol("header block completed on unknown stream"))?
            .take_header_block();
        let headers = self.hpack.decoder.decode(&block)?;

        let is_trailers = self
            .registry
            .get(stream_id)
            .map(|s| s.request_headers_ready())
            .unwrap_or(false);

        let stream = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| ConnectionError::protocol("stream vanished mid-header-block"))?;
        if let Err(err) = stream.ingest_headers(headers, is_trailers) {
            self.reset_stream(stream_id, err.code);
            return Ok(());
        }

        if !is_trailers && !self.handlers_spawned.contains(&stream_id) {
            self.spawn_handler_task(stream_id);
        }
        self.registry.remove_if_closed(stream_id);
        Ok(())
    }

    fn spawn_handler_task(&mut self, stream_id: StreamId) {
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let Some(stream) = self.registry.get_mut(stream_id) else {
            return;
        };
        let body_closed = matches!(stream.state, StreamState::HalfClosedRemote | StreamState::Closed);
        let headers = stream.request_headers.clone();
        let content_length = stream.content_length;
        if body_closed {
            // END_STREAM already seen (carried by HEADERS or a prior DATA frame): no body to stream.
            drop(body_tx);
        } else {
            stream.body_tx = Some(body_tx);
        }
        self.handlers_spawned.insert(stream_id);

        let request = Request::new(headers, content_length, body_rx);
        let handle = StreamHandle::new(stream_id, self.to_connection_tx.clone());
        crate::handler::spawn(Arc::clone(&self.handler), request, handle);
        debug!("dispatched handler task for stream {stream_id}");
    }

    fn handle_priority(&mut self, stream_id: StreamId, priority: PriorityFields) -> Result<(), DispatchError> {
        trace!("ignoring PRIORITY on stream {stream_id}: {priority:?}");
        Ok(())
    }

    fn handle_reset_stream(&mut self, stream_id: StreamId, error: Http2ErrorCode) -> Result<(), DispatchError> {
        let stream = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| ConnectionError::protocol("RST_STREAM on unknown stream"))?;
        stream.on_reset()?;
        stream.body_tx = None;
        debug!("stream {stream_id} reset by peer: {error:?}");
        self.registry.remove_if_closed(stream_id);
        Ok(())
    }

    fn handle_settings(&mut self, ack: bool, params: Vec<(SettingsParameter, u32)>) -> Result<(), DispatchError> {
        if ack {
            debug!("peer acknowledged our SETTINGS");
            return Ok(());
        }

        let previous_initial_window = i64::from(self.remote_settings.initial_window_size);
        for (param, value) in &params {
            self.remote_settings.apply(*param, *value)?;
        }
        let delta = i64::from(self.remote_settings.initial_window_size) - previous_initial_window;
        if delta != 0 {
            self.registry.apply_initial_window_delta(delta)?;
        }
        self.registry.set_remote_max_concurrent_streams(self.remote_settings.max_concurrent_streams);
        self.hpack.encoder.set_max_table_size(self.remote_settings.header_table_size as usize);
        debug!("applied remote SETTINGS: {:?}", self.remote_settings);
        self.outbound.push_back(Frame::Settings { ack: true, params: Vec::new() });
        Ok(())
    }

    fn handle_ping(&mut self, ack: bool, payload: [u8; 8]) {
        if !ack {
            self.outbound.push_back(Frame::Ping { ack: true, payload });
        }
    }

    fn handle_goaway(&mut self, last_stream_id: StreamId, error: Http2ErrorCode, debug: Bytes) {
        self.goaway_received = true;
        warn!(
            "peer sent GOAWAY last_stream_id={last_stream_id} error={error:?} debug={:?}",
            String::from_utf8_lossy(&debug)
        );
    }

    async fn handle_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<(), DispatchError> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(ConnectionError::protocol("WINDOW_UPDATE increment must not be 0").into());
            }
            self.send_window
                .increment(increment)
                .map_err(|_| ConnectionError::flow_control("connection send window overflow"))?;
            self.flush_pending_sends(None).await;
            return Ok(());
        }

        if increment == 0 {
            self.reset_stream(stream_id, Http2ErrorCode::ProtocolError);
            return Ok(());
        }

        if self.registry.get(stream_id).is_none() {
            if stream_id > self.registry.highest_peer_stream_id() {
                return Err(ConnectionError::protocol("WINDOW_UPDATE on an idle stream").into());
            }
            // A stream we've already closed and forgotten: tolerated.
            return Ok(());
        }
        let overflowed = self
            .registry
            .get_mut(stream_id)
            .map(|s| s.send_window.increment(increment).is_err())
            .unwrap_or(false);
        if overflowed {
            self.reset_stream(stream_id, Http2ErrorCode::FlowControlError);
            return Ok(());
        }
        self.flush_pending_sends(Some(stream_id)).await;
        Ok(())
    }

    // ---- outbound, driven by handler tasks ----

    fn send_headers(&mut self, stream_id: StreamId, headers: Vec<HeaderField>, end_stream: bool) -> Result<(), StreamError> {
        let stream = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| StreamError::new(Http2ErrorCode::StreamClosed, "stream no longer exists"))?;
        stream.on_send_headers(end_stream)?;
        let fragment = self.hpack.encoder.encode(headers.iter());
        self.outbound.push_back(Frame::Headers {
            stream_id,
            end_stream,
            end_headers: true,
            priority: None,
            fragment: fragment.into(),
        });
        self.registry.remove_if_closed(stream_id);
        Ok(())
    }

    fn send_push(&mut self, parent_stream_id: StreamId, headers: Vec<HeaderField>) -> Result<StreamId, StreamError> {
        if !self.remote_settings.enable_push {
            return Err(StreamError::refused("peer disabled server push"));
        }
        if self.registry.get(parent_stream_id).is_none() {
            return Err(StreamError::new(Http2ErrorCode::StreamClosed, "push parent no longer exists"));
        }
        if self.registry.at_concurrency_limit(Initiator::Server) {
            return Err(StreamError::refused("SETTINGS_MAX_CONCURRENT_STREAMS reached for server push"));
        }
        let promised_id = self.registry.allocate_push_stream(
            i64::from(self.remote_settings.initial_window_size),
            i64::from(self.local_settings.initial_window_size),
        );
        if let Some(stream) = self.registry.get_mut(promised_id) {
            stream.on_reserve_local()?;
            stream.push_parent = Some(parent_stream_id);
        }
        let fragment = self.hpack.encoder.encode(headers.iter());
        self.outbound.push_back(Frame::PushPromise {
            stream_id: parent_stream_id,
            end_headers: true,
            promised_stream_id: promised_id,
            fragment: fragment.into(),
        });
        Ok(promised_id)
    }

    /// Attempts to admit as much of `data` as the connection and stream
    /// windows currently allow; whatever doesn't fit is parked on the
    /// stream's pending-send queue and flushed by a later WINDOW_UPDATE.
    fn queue_or_send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool, reply: tokio::sync::oneshot::Sender<Result<(), StreamError>>) {
        match self.admit_data(stream_id, data, end_stream) {
            Ok(None) => {
                reply.send(Ok(())).ok();
            }
            Ok(Some((remainder, end_stream))) => {
                if let Some(stream) = self.registry.get_mut(stream_id) {
                    stream.pending_sends.push_back(crate::stream::PendingSend {
                        data: remainder,
                        end_stream,
                        reply,
                    });
                } else {
                    reply.send(Err(StreamError::new(Http2ErrorCode::StreamClosed, "stream no longer exists"))).ok();
                }
            }
            Err(err) => {
                reply.send(Err(err)).ok();
            }
        }
        self.registry.remove_if_closed(stream_id);
    }

    /// Admits as many bytes of `data` as the min of both windows allows.
    /// Returns `None` if fully sent, `Some((remainder, end_stream))`
    /// otherwise. A zero-length DATA carrying END_STREAM always goes
    /// through even with an exhausted window.
    fn admit_data(&mut self, stream_id: StreamId, mut data: Bytes, end_stream: bool) -> Result<Option<(Bytes, bool)>, StreamError> {
        let conn_avail = self.send_window.available() as usize;
        let stream = self
            .registry
            .get_mut(stream_id)
            .ok_or_else(|| StreamError::new(Http2ErrorCode::StreamClosed, "stream no longer exists"))?;
        if stream.is_closed() {
            return Err(StreamError::new(Http2ErrorCode::StreamClosed, "stream is closed"));
        }

        let avail = conn_avail.min(stream.send_window.available() as usize);
        if avail == 0 && !data.is_empty() {
            return Ok(Some((data, end_stream)));
        }

        let send_len = data.len().min(avail);
        let chunk = data.split_to(send_len);
        if send_len > 0 {
            self.send_window.debit(send_len as u32);
            stream.send_window.debit(send_len as u32);
        }
        let frame_end_stream = end_stream && data.is_empty();
        if frame_end_stream {
            stream.on_send_end_stream()?;
        }
        self.outbound.push_back(Frame::Data {
            stream_id,
            end_stream: frame_end_stream,
            data: chunk,
        });

        if data.is_empty() {
            Ok(None)
        } else {
            Ok(Some((data, end_stream)))
        }
    }

    /// Re-attempts parked sends after a WINDOW_UPDATE. `stream_id == None`
    /// means the connection window moved, so every stream with pending data
    /// gets a chance; otherwise only the named stream is retried.
    async fn flush_pending_sends(&mut self, stream_id: Option<StreamId>) {
        let candidates: Vec<StreamId> = match stream_id {
            Some(id) => vec![id],
            None => self.registry.iter_mut().filter(|s| !s.pending_sends.is_empty()).map(|s| s.id).collect(),
        };
        for id in candidates {
            loop {
                let Some(stream) = self.registry.get_mut(id) else { break };
                let Some(pending) = stream.pending_sends.pop_front() else { break };
                match self.admit_data(id, pending.data, pending.end_stream) {
                    Ok(None) => {
                        pending.reply.send(Ok(())).ok();
                    }
                    Ok(Some((remainder, end_stream))) => {
                        if let Some(stream) = self.registry.get_mut(id) {
                            stream.pending_sends.push_front(crate::stream::PendingSend {
                                data: remainder,
                                end_stream,
                                reply: pending.reply,
                            });
                        }
                        break;
                    }
                    Err(err) => {
                        pending.reply.send(Err(err)).ok();
                    }
                }
            }
        }
    }

    fn stream_terminated(&mut self, stream_id: StreamId, outcome: TerminationOutcome) {
        self.handlers_spawned.remove(&stream_id);
        let Some(stream) = self.registry.get_mut(stream_id) else {
            return;
        };
        if stream.is_closed() {
            self.registry.remove_if_closed(stream_id);
            return;
        }
        let code = match outcome {
            TerminationOutcome::Normal => Http2ErrorCode::NoError,
            TerminationOutcome::Failed => Http2ErrorCode::InternalError,
        };
        self.reset_stream(stream_id, code);
    }

    fn reset_stream(&mut self, stream_id: StreamId, code: Http2ErrorCode) {
        if let Some(stream) = self.registry.get_mut(stream_id) {
            stream.on_reset().ok();
            stream.body_tx = None;
        }
        self.outbound.push_back(Frame::ResetStream { stream_id, error: code });
        self.registry.remove_if_closed(stream_id);
    }

    /// Tops up the connection's and stream's receive windows once either
    /// has drained past half its initial size.
    fn maybe_refill_windows(&mut self, stream_id: StreamId) {
        let initial = i64::from(self.local_settings.initial_window_size);
        let threshold = initial / WINDOW_UPDATE_THRESHOLD_DIVISOR;

        if self.recv_window.size() < threshold {
            let top_up = initial - self.recv_window.size();
            if self.recv_window.increment(top_up as u32).is_ok() {
                self.outbound.push_back(Frame::WindowUpdate { stream_id: 0, increment: top_up as u32 });
            }
        }
        if let Some(stream) = self.registry.get_mut(stream_id) {
            if stream.recv_window.size() < threshold {
                let top_up = initial - stream.recv_window.size();
                if top_up > 0 && stream.recv_window.increment(top_up as u32).is_ok() {
                    self.outbound.push_back(Frame::WindowUpdate { stream_id, increment: top_up as u32 });
                }
            }
        }
    }

    /// Emits GOAWAY and marks the connection as draining. The transport
    /// layer is responsible for giving in-flight streams `drain_deadline`
    /// before forcing the socket closed.
    pub fn shutdown_connection(&mut self, error: Http2ErrorCode, reason: impl Into<String>) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        let reason = reason.into();
        warn!("emitting GOAWAY({error:?}): {reason}");
        self.outbound.push_back(Frame::GoAway {
            last_stream_id: self.last_processed_stream_id,
            error,
            debug: Bytes::from(reason),
        });
    }

    #[must_use]
    pub fn drain_deadline(&self) -> std::time::Duration {
        self.config.drain_deadline
    }

    #[must_use]
    pub fn read_timeout(&self) -> std::time::Duration {
        self.config.read_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Request as HandlerRequest;
    use std::future::Future;
    use std::pin::Pin;

    struct Echo;
    impl Handler for Echo {
        fn call(&self, _request: HandlerRequest, handle: StreamHandle) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
            Box::pin(async move {
                handle
                    .send_headers(vec![HeaderField::new(":status".as_bytes().to_vec(), b"200".to_vec())], true)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))
            })
        }
    }

    fn connection() -> Connection {
        let (conn, _tx) = Connection::new(Config::default(), Arc::new(Echo));
        conn
    }

    #[tokio::test]
    async fn init_queues_a_settings_frame() {
        let mut conn = connection();
        conn.init();
        let frames = conn.take_outbound();
        assert!(matches!(frames.as_slice(), [Frame::Settings { ack: false, .. }]));
    }

    #[tokio::test]
    async fn first_frame_other_than_settings_is_protocol_error() {
        let mut conn = connection();
        let err = conn
            .handle_frame(Frame::Ping { ack: false, payload: [0; 8] })
            .await
            .unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn settings_ack_does_not_error() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Settings { ack: true, params: vec![] }).await.unwrap();
    }

    #[tokio::test]
    async fn ping_without_ack_queues_a_reply() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Ping {
            ack: false,
            payload: [1, 2, 3, 4, 5, 6, 7, 8],
        })
        .await
        .unwrap();
        let frames = conn.take_outbound();
        assert!(matches!(frames.as_slice(), [Frame::Ping { ack: true, .. }]));
    }

    #[tokio::test]
    async fn even_stream_id_from_client_is_protocol_error() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        let err = conn
            .handle_frame(Frame::Headers {
                stream_id: 2,
                end_stream: true,
                end_headers: true,
                priority: None,
                fragment: Bytes::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn headers_without_end_headers_requires_continuation_next() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Headers {
            stream_id: 1,
            end_stream: false,
            end_headers: false,
            priority: None,
            fragment: Bytes::new(),
        })
        .await
        .unwrap();
        let err = conn
            .handle_frame(Frame::Data {
                stream_id: 1,
                end_stream: false,
                data: Bytes::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn window_update_on_idle_stream_is_protocol_error() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        let err = conn
            .handle_frame(Frame::WindowUpdate { stream_id: 7, increment: 10 })
            .await
            .unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn zero_increment_on_connection_window_is_a_connection_error() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        let err = conn
            .handle_frame(Frame::WindowUpdate { stream_id: 0, increment: 0 })
            .await
            .unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::ProtocolError);
    }

    #[tokio::test]
    async fn zero_increment_on_a_stream_window_only_resets_that_stream() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Headers {
            stream_id: 1,
            end_stream: false,
            end_headers: true,
            priority: None,
            fragment: Bytes::new(),
        })
        .await
        .unwrap();
        conn.take_outbound();
        conn.handle_frame(Frame::WindowUpdate { stream_id: 1, increment: 0 }).await.unwrap();
        let frames = conn.take_outbound();
        assert!(matches!(
            frames.as_slice(),
            [Frame::ResetStream {
                stream_id: 1,
                error: Http2ErrorCode::ProtocolError
            }]
        ));
    }

    #[tokio::test]
    async fn push_is_refused_once_the_remote_advertised_concurrency_cap_is_reached() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Headers {
            stream_id: 1,
            end_stream: true,
            end_headers: true,
            priority: None,
            fragment: Bytes::new(),
        })
        .await
        .unwrap();
        conn.registry.set_remote_max_concurrent_streams(1);

        let first = conn.send_push(1, vec![HeaderField::new(b":status".to_vec(), b"200".to_vec())]).unwrap();
        // Simulate the pushed stream's handler having sent its response
        // headers, which is what actually makes a reserved push stream
        // count toward concurrency.
        conn.registry.get_mut(first).unwrap().on_send_headers(false).unwrap();

        let second = conn.send_push(1, vec![HeaderField::new(b":status".to_vec(), b"200".to_vec())]);
        let err = second.unwrap_err();
        assert_eq!(err.code, Http2ErrorCode::RefusedStream);
    }

    #[tokio::test]
    async fn remote_settings_initial_window_delta_applies_to_open_streams() {
        let mut conn = connection();
        conn.handle_frame(Frame::Settings { ack: false, params: vec![] }).await.unwrap();
        conn.handle_frame(Frame::Headers {
            stream_id: 1,
            end_stream: false,
            end_headers: true,
            priority: None,
            fragment: Bytes::new(),
        })
        .await
        .unwrap();
        let before = conn.registry.get(1).unwrap().send_window.size();
        conn.handle_frame(Frame::Settings {
            ack: false,
            params: vec![(SettingsParameter::InitialWindowSize, 100)],
        })
        .await
        .unwrap();
        let after = conn.registry.get(1).unwrap().send_window.size();
        assert_eq!(after - before, 100 - 65_535);
    }

    #[tokio::test]
    async fn shutdown_emits_goaway_once() {
        let mut conn = connection();
        conn.shutdown_connection(Http2ErrorCode::NoError, "server shutting down");
        conn.shutdown_connection(Http2ErrorCode::NoError, "again");
        let frames = conn.take_outbound();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::GoAway { .. }));
    }
}
