//! Engine gauges, intended for the periodic stats line the run loop logs and
//! for host-side scraping via [`EngineMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Live gauges shared by the queue, the registry and the run loop.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    queued_actions: AtomicU64,
    live_sessions: AtomicU64,
    archived_sessions: AtomicU64,
}

impl EngineMetrics {
    pub(crate) fn action_queued(&self) {
        self.queued_actions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn action_drained(&self) {
        self.queued_actions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn session_opened(&self) {
        self.live_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.live_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn session_archived(&self) {
        self.archived_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn archive_purged(&self, count: u64) {
        self.archived_sessions.fetch_sub(count, Ordering::Relaxed);
    }

    /// A consistent-enough point-in-time read of all gauges.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queued_actions: self.queued_actions.load(Ordering::Relaxed),
            live_sessions: self.live_sessions.load(Ordering::Relaxed),
            archived_sessions: self.archived_sessions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queued_actions: u64,
    pub live_sessions: u64,
    pub archived_sessions: u64,
}
