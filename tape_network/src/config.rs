//! Runtime configuration shared by controllers and servers.

use core::time::Duration;
use serde::{Deserialize, Serialize};

/// How often an idle accept loop checks whether it was asked to shut down.
pub const DEFAULT_ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning knobs for [`StreamController`](crate::StreamController)s and
/// [`StreamServer`](crate::StreamServer)s.
///
/// The defaults reproduce the plain protocol semantics: no deadlines, no payload
/// limit.
///
/// Controllers created by a server inherit the server's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum time a controller waits for the next byte before giving up on the
    /// connection. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Maximum time a single [`send`](crate::StreamController::send) may block.
    pub write_timeout: Option<Duration>,
    /// Maximum time spent connecting to each resolved address.
    pub connect_timeout: Option<Duration>,
    /// Delay between two accept attempts when no connection is pending.
    pub accept_poll_interval: Duration,
    /// Largest payload (media bytes or URL) accepted from peers. `None` accepts
    /// anything the 64-bit length prefix can describe.
    pub max_payload_len: Option<u64>,
    /// Disables Nagle's algorithm on TCP connections.
    pub nodelay: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
            accept_poll_interval: DEFAULT_ACCEPT_POLL_INTERVAL,
            max_payload_len: None,
            nodelay: true,
        }
    }
}

impl StreamConfig {
    /// Sets [`read_timeout`](Self::read_timeout).
    #[inline(always)]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets [`write_timeout`](Self::write_timeout).
    #[inline(always)]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets [`connect_timeout`](Self::connect_timeout).
    #[inline(always)]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets [`accept_poll_interval`](Self::accept_poll_interval).
    ///
    /// # Note
    ///
    /// This also paces retries when accepting fails for lack of resources.
    #[inline(always)]
    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    /// Sets [`max_payload_len`](Self::max_payload_len).
    #[inline(always)]
    pub fn with_max_payload_len(mut self, max: Option<u64>) -> Self {
        self.max_payload_len = max;
        self
    }

    /// Sets [`nodelay`](Self::nodelay).
    #[inline(always)]
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}
