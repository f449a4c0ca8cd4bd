use crate::settings::Settings;
use std::time::Duration;

/// Tunables an embedding acceptor supplies when handing a negotiated socket
/// to `Connection::init`. Mirrors the teacher crate's pattern of collecting
/// per-connection knobs in one small, `Default`-able struct rather than
/// threading individual parameters through every constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// The local SETTINGS sent on connection up.
    pub local_settings: Settings,
    /// How long the connection task waits for bytes on an idle socket
    /// before treating the peer as gone.
    pub read_timeout: Duration,
    /// How long `shutdown_connection` waits for in-flight streams to finish
    /// after emitting GOAWAY before forcing the socket closed.
    pub drain_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_settings: Settings::default(),
            read_timeout: Duration::from_secs(20),
            drain_deadline: Duration::from_secs(1),
        }
    }
}
