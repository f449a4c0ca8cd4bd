use crate::error::ConnectionError;
use crate::frame::StreamId;
use crate::stream::{Initiator, Stream};
use std::collections::BTreeMap;

/// Id-ordered registry of live streams for one connection. Confined to the
/// connection task: a flat map, not a graph — push-promise parent links are
/// stored on `Stream::push_parent` as plain id lookups, never ownership, so
/// there is nothing to form a cycle.
pub struct StreamRegistry {
    streams: BTreeMap<StreamId, Stream>,
    highest_peer_stream_id: StreamId,
    next_local_push_id: StreamId,
    /// Our own `SETTINGS_MAX_CONCURRENT_STREAMS`, capping client-initiated
    /// streams. Set once at construction; inbound SETTINGS never touch it —
    /// only we get to decide how many streams of ours the client may open.
    local_max_concurrent_streams: u32,
    /// The peer's advertised `SETTINGS_MAX_CONCURRENT_STREAMS`, capping
    /// server-initiated (push) streams. Updated whenever the peer's SETTINGS
    /// change; `u32::MAX` (the RFC default) until it tells us otherwise.
    remote_max_concurrent_streams: u32,
    goaway_cutoff: Option<StreamId>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new(local_max_concurrent_streams: u32) -> Self {
        Self {
            streams: BTreeMap::new(),
            highest_peer_stream_id: 0,
            next_local_push_id: 2,
            local_max_concurrent_streams,
            remote_max_concurrent_streams: crate::settings::DEFAULT_MAX_CONCURRENT_STREAMS,
            goaway_cutoff: None,
        }
    }

    pub fn set_remote_max_concurrent_streams(&mut self, value: u32) {
        self.remote_max_concurrent_streams = value;
    }

    #[must_use]
    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    #[must_use]
    pub fn highest_peer_stream_id(&self) -> StreamId {
        self.highest_peer_stream_id
    }

    /// Creates an idle stream for a peer-initiated id if it is new and
    /// strictly greater than every peer id seen so far; returns the existing
    /// stream otherwise. A regressed or reused id is a connection error.
    /// `initial_send_window`/`initial_recv_window` seed the new stream from
    /// the currently negotiated SETTINGS (remote's for what we may send,
    /// local's for what the peer may send us).
    pub fn insert_or_get_peer(
        &mut self,
        id: StreamId,
        initial_send_window: i64,
        initial_recv_window: i64,
    ) -> Result<&mut Stream, ConnectionError> {
        if self.streams.contains_key(&id) {
            return Ok(self.streams.get_mut(&id).expect("checked above"));
        }
        if id <= self.highest_peer_stream_id {
            return Err(ConnectionError::protocol(format!(
                "stream id {id} is not monotonically increasing (last seen {})",
                self.highest_peer_stream_id
            )));
        }
        if let Some(cutoff) = self.goaway_cutoff {
            if id > cutoff {
                return Err(ConnectionError::protocol(format!(
                    "stream id {id} opened after GOAWAY cutoff {cutoff}"
                )));
            }
        }
        self.highest_peer_stream_id = id;
        self.streams
            .insert(id, Stream::new(id, Initiator::Client, initial_send_window, initial_recv_window));
        Ok(self.streams.get_mut(&id).expect("just inserted"))
    }

    /// Allocates the next even stream id for a server push and inserts it
    /// reserved(local)-bound.
    pub fn allocate_push_stream(&mut self, initial_send_window: i64, initial_recv_window: i64) -> StreamId {
        let id = self.next_local_push_id;
        self.next_local_push_id += 2;
        self.streams
            .insert(id, Stream::new(id, Initiator::Server, initial_send_window, initial_recv_window));
        id
    }

    #[must_use]
    pub fn active_count(&self, initiator: Initiator) -> u32 {
        self.streams
            .values()
            .filter(|s| s.initiator == initiator && s.counts_toward_concurrency())
            .count() as u32
    }

    #[must_use]
    pub fn at_concurrency_limit(&self, initiator: Initiator) -> bool {
        let cap = match initiator {
            Initiator::Client => self.local_max_concurrent_streams,
            Initiator::Server => self.remote_max_concurrent_streams,
        };
        self.active_count(initiator) >= cap
    }

    /// Applies a SETTINGS_INITIAL_WINDOW_SIZE change to every open stream's
    /// send window (RFC 7540 6.9.2).
    pub fn apply_initial_window_delta(&mut self, delta: i64) -> Result<(), ConnectionError> {
        for stream in self.streams.values_mut() {
            stream
                .send_window
                .apply_initial_window_delta(delta)
                .map_err(|_| ConnectionError::flow_control("SETTINGS_INITIAL_WINDOW_SIZE overflowed a stream window"))?;
        }
        Ok(())
    }

    /// Marks that GOAWAY has been emitted with `last_stream_id`: any
    /// not-yet-seen id beyond it is refused going forward.
    pub fn cutoff(&mut self, last_stream_id: StreamId) {
        self.goaway_cutoff = Some(self.goaway_cutoff.map_or(last_stream_id, |c| c.min(last_stream_id)));
    }

    pub fn remove_if_closed(&mut self, id: StreamId) {
        if self.streams.get(&id).map(Stream::is_closed).unwrap_or(false) {
            self.streams.remove(&id);
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }
}
