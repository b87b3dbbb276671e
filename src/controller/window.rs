//! Sliding window over recent IDENTIFY dispatches

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Width of the IDENTIFY window. Discord documents 5 seconds; the extra
/// half second is a safety margin.
pub const IDENTIFY_WINDOW: Duration = Duration::from_millis(5500);

/// Timestamps of dispatches younger than the window width.
///
/// Stale entries are pruned lazily whenever the window is inspected.
#[derive(Debug)]
pub struct IdentifyWindow {
    limit: usize,
    width: Duration,
    timestamps: VecDeque<Instant>,
}

impl IdentifyWindow {
    pub fn new(limit: usize, width: Duration) -> Self {
        Self {
            limit,
            width,
            timestamps: VecDeque::with_capacity(limit),
        }
    }

    /// Remove timestamps at least `width` old
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.saturating_duration_since(*front) >= self.width {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// True if another dispatch now would exceed the limit
    pub fn is_saturated(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() >= self.limit
    }

    /// Record a dispatch
    pub fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Number of dispatches still inside the window
    pub fn in_use(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.timestamps.len()
    }

    /// Time until the oldest dispatch leaves the window, if saturated
    pub fn retry_after(&mut self, now: Instant) -> Option<Duration> {
        if !self.is_saturated(now) {
            return None;
        }
        self.timestamps
            .front()
            .map(|oldest| self.width.saturating_sub(now.saturating_duration_since(*oldest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_limit() {
        let start = Instant::now();
        let mut window = IdentifyWindow::new(2, IDENTIFY_WINDOW);

        assert!(!window.is_saturated(start));
        window.record(start);
        assert!(!window.is_saturated(start));
        window.record(start);
        assert!(window.is_saturated(start));
        assert_eq!(window.in_use(start), 2);
    }

    #[test]
    fn entries_expire_after_window() {
        let start = Instant::now();
        let mut window = IdentifyWindow::new(1, IDENTIFY_WINDOW);
        window.record(start);

        // Still inside the 5.5s window at 5s
        assert!(window.is_saturated(start + Duration::from_secs(5)));

        // Exactly at the width the entry no longer counts
        assert!(!window.is_saturated(start + IDENTIFY_WINDOW));
        assert_eq!(window.in_use(start + IDENTIFY_WINDOW), 0);
    }

    #[test]
    fn retry_after_counts_down_from_oldest() {
        let start = Instant::now();
        let mut window = IdentifyWindow::new(1, Duration::from_secs(5));
        window.record(start);

        assert_eq!(
            window.retry_after(start + Duration::from_secs(2)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(window.retry_after(start + Duration::from_secs(6)), None);
    }
}
