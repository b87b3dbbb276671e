//! Admission state
//!
//! The synchronous core of the controller. Owns the wait queue, the set of
//! connecting shards, the IDENTIFY window and the per-shard socket handles.
//! Time is passed in so every decision is deterministic under test.
//!
//! Invariants held after every method returns:
//! - connecting shards never exceed `max_concurrency`
//! - dispatches inside the window never exceed `max_concurrency`
//! - a shard is never both queued and connecting
//! - every connecting shard has exactly one bound handle

use super::queue::{ConnectionRequest, WaitQueue};
use super::window::IdentifyWindow;
use crate::protocol::ShardId;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Result of a REQUEST_CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Added to the wait queue
    Queued,
    /// Already waiting; nothing changed
    AlreadyQueued,
    /// Already allowed to identify; CONNECT_READY should be resent
    AlreadyConnecting,
}

/// A shard moved from the queue into the connecting set
#[derive(Debug, Clone)]
pub struct Admission<H> {
    pub shard_id: ShardId,
    pub priority: bool,
    pub handle: H,
    /// Time spent in the wait queue
    pub waited: Duration,
}

/// Result of a CONNECT_COMPLETE
#[derive(Debug)]
pub struct Completion<H> {
    pub was_connecting: bool,
    /// The shard was still waiting; its request is withdrawn
    pub was_queued: bool,
    /// The released handle, to be closed by the caller
    pub handle: Option<H>,
    /// Time spent in the wait queue
    pub waited: Option<Duration>,
    /// Time between dispatch and completion
    pub connect_time: Option<Duration>,
}

/// Where a purged shard was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Purged {
    pub was_queued: bool,
    pub was_connecting: bool,
}

/// Point-in-time view for health endpoints and gauges
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub max_concurrency: usize,
    pub queued: usize,
    pub connecting: usize,
    pub identify_window_in_use: usize,
    pub tracked_sockets: usize,
    pub rate_limited: bool,
}

#[derive(Debug)]
struct ConnectingShard {
    request: ConnectionRequest,
    dispatched_at: Instant,
}

/// Admission state, generic over the socket handle type
#[derive(Debug)]
pub struct AdmissionState<H> {
    max_concurrency: usize,
    queue: WaitQueue,
    connecting: HashMap<ShardId, ConnectingShard>,
    window: IdentifyWindow,
    handles: HashMap<ShardId, H>,
}

impl<H: Clone + PartialEq> AdmissionState<H> {
    pub fn new(max_concurrency: usize, rate_window: Duration) -> Self {
        Self {
            max_concurrency,
            queue: WaitQueue::new(),
            connecting: HashMap::new(),
            window: IdentifyWindow::new(max_concurrency, rate_window),
            handles: HashMap::new(),
        }
    }

    /// Route future replies for `shard_id` to `handle`
    pub fn bind_handle(&mut self, shard_id: ShardId, handle: H) -> Option<H> {
        self.handles.insert(shard_id, handle)
    }

    /// Handle currently bound to a shard
    pub fn handle(&self, shard_id: ShardId) -> Option<H> {
        self.handles.get(&shard_id).cloned()
    }

    /// All bound handles
    pub fn handles(&self) -> Vec<(ShardId, H)> {
        self.handles
            .iter()
            .map(|(shard_id, handle)| (*shard_id, handle.clone()))
            .collect()
    }

    /// Idempotent enqueue
    pub fn request(&mut self, shard_id: ShardId, priority: bool, now: Instant) -> RequestOutcome {
        if self.queue.contains(shard_id) {
            RequestOutcome::AlreadyQueued
        } else if self.connecting.contains_key(&shard_id) {
            RequestOutcome::AlreadyConnecting
        } else {
            self.queue
                .push(ConnectionRequest::new(shard_id, priority, now));
            RequestOutcome::Queued
        }
    }

    /// Admit as many queued shards as the concurrency cap and the
    /// IDENTIFY window allow, in (rank, arrival) order.
    pub fn admit(&mut self, now: Instant) -> Vec<Admission<H>> {
        let mut admitted = Vec::new();

        while !self.queue.is_empty()
            && self.connecting.len() < self.max_concurrency
            && !self.window.is_saturated(now)
        {
            let Some(request) = self.queue.pop() else {
                break;
            };

            let Some(handle) = self.handles.get(&request.shard_id).cloned() else {
                warn!(
                    shard_id = request.shard_id,
                    "Queued shard has no socket to notify - dropping its request"
                );
                continue;
            };

            self.window.record(now);
            self.connecting.insert(
                request.shard_id,
                ConnectingShard {
                    request,
                    dispatched_at: now,
                },
            );

            admitted.push(Admission {
                shard_id: request.shard_id,
                priority: request.priority,
                handle,
                waited: now.saturating_duration_since(request.enqueue_time),
            });
        }

        admitted
    }

    /// Free a shard's slot and release its handle.
    ///
    /// A shard that completes while still queued loses its queue entry too,
    /// since the released handle leaves nothing to notify.
    pub fn complete(&mut self, shard_id: ShardId, now: Instant) -> Completion<H> {
        let entry = self.connecting.remove(&shard_id);
        let was_queued = self.queue.remove(shard_id).is_some();
        let handle = self.handles.remove(&shard_id);

        Completion {
            was_connecting: entry.is_some(),
            was_queued,
            handle,
            waited: entry.as_ref().map(|e| {
                e.dispatched_at
                    .saturating_duration_since(e.request.enqueue_time)
            }),
            connect_time: entry
                .as_ref()
                .map(|e| now.saturating_duration_since(e.dispatched_at)),
        }
    }

    /// Forget a shard whose socket failed.
    ///
    /// Only acts if `handle` is still the one bound to the shard; a shard
    /// that re-registered on a new connection in the meantime is left alone.
    pub fn purge(&mut self, shard_id: ShardId, handle: &H) -> Option<Purged> {
        if self.handles.get(&shard_id) != Some(handle) {
            return None;
        }

        self.handles.remove(&shard_id);
        Some(Purged {
            was_queued: self.queue.remove(shard_id).is_some(),
            was_connecting: self.connecting.remove(&shard_id).is_some(),
        })
    }

    pub fn is_queued(&self, shard_id: ShardId) -> bool {
        self.queue.contains(shard_id)
    }

    pub fn is_connecting(&self, shard_id: ShardId) -> bool {
        self.connecting.contains_key(&shard_id)
    }

    pub fn snapshot(&mut self, now: Instant) -> StateSnapshot {
        StateSnapshot {
            max_concurrency: self.max_concurrency,
            queued: self.queue.len(),
            connecting: self.connecting.len(),
            identify_window_in_use: self.window.in_use(now),
            tracked_sockets: self.handles.len(),
            rate_limited: self.window.is_saturated(now),
        }
    }

    /// Time until the IDENTIFY window admits another dispatch
    pub fn rate_limit_retry_after(&mut self, now: Instant) -> Option<Duration> {
        self.window.retry_after(now)
    }
}
