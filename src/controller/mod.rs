//! Shard IDENTIFY admission controller
//!
//! Decides which shard may identify next under Discord's `max_concurrency`
//! limit, across every bot process that connects to it.

mod queue;
mod server;
mod socket;
mod state;
mod window;

pub use queue::{ConnectionRequest, WaitQueue, NORMAL_RANK, PRIORITY_RANK};
pub use server::AdmissionController;
pub use socket::SocketHandle;
pub use state::{Admission, AdmissionState, Completion, Purged, RequestOutcome, StateSnapshot};
pub use window::{IdentifyWindow, IDENTIFY_WINDOW};

use std::time::Duration;

/// How often the dispatch loop re-checks the queue without a wake-up
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(100);

/// How often every bound shard socket is pinged
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Delay before resending CONNECT_READY to a shard that asked again
pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single control message write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Discord's `session_start_limit.max_concurrency`
    pub max_concurrency: usize,
    pub dispatch_interval: Duration,
    pub keepalive_interval: Duration,
    pub rate_window: Duration,
    pub resend_delay: Duration,
    pub write_timeout: Duration,
}

impl ControllerSettings {
    /// Default timings for the given concurrency. Values below 1 are
    /// raised to 1 so the queue can always drain.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            rate_window: IDENTIFY_WINDOW,
            resend_delay: DEFAULT_RESEND_DELAY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
