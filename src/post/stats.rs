//! Post-processing statistics (atomic for thread-safe access)

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PostStats {
    pub blocks_processed: AtomicU64,
    pub empty_blocks: AtomicU64,
    pub samples_converted: AtomicU64,
    pub primary_sent: AtomicU64,
    pub visual_published: AtomicU64,
    pub visual_dropped: AtomicU64,
    pub demod_dispatches: AtomicU64,
    pub idle_notifications: AtomicU64,
    pub retune_requests: AtomicU64,
    pub pool_size: AtomicUsize,
}

impl PostStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_block(&self, samples: usize) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.samples_converted.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_empty(&self) {
        self.empty_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_visual(&self, published: bool) {
        if published {
            self.visual_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.visual_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            timestamp_ms: chrono::Utc::now().timestamp_millis() as u64,
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            empty_blocks: self.empty_blocks.load(Ordering::Relaxed),
            samples_converted: self.samples_converted.load(Ordering::Relaxed),
            primary_sent: self.primary_sent.load(Ordering::Relaxed),
            visual_published: self.visual_published.load(Ordering::Relaxed),
            visual_dropped: self.visual_dropped.load(Ordering::Relaxed),
            demod_dispatches: self.demod_dispatches.load(Ordering::Relaxed),
            idle_notifications: self.idle_notifications.load(Ordering::Relaxed),
            retune_requests: self.retune_requests.load(Ordering::Relaxed),
            pool_size: self.pool_size.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `PostStats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub timestamp_ms: u64,
    pub blocks_processed: u64,
    pub empty_blocks: u64,
    pub samples_converted: u64,
    pub primary_sent: u64,
    pub visual_published: u64,
    pub visual_dropped: u64,
    pub demod_dispatches: u64,
    pub idle_notifications: u64,
    pub retune_requests: u64,
    pub pool_size: usize,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Blocks: {} ({} empty) | Samples: {} | Demod dispatches: {} | Idle: {} | Visual: {} sent, {} dropped | Retunes: {} | Pool: {}",
            self.blocks_processed,
            self.empty_blocks,
            self.samples_converted,
            self.demod_dispatches,
            self.idle_notifications,
            self.visual_published,
            self.visual_dropped,
            self.retune_requests,
            self.pool_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PostStats::new();
        stats.record_block(1024);
        stats.record_block(1024);
        stats.record_empty();
        stats.record_visual(true);
        stats.record_visual(false);
        PostStats::bump(&stats.idle_notifications);

        let snap = stats.snapshot();
        assert_eq!(snap.blocks_processed, 2);
        assert_eq!(snap.samples_converted, 2048);
        assert_eq!(snap.empty_blocks, 1);
        assert_eq!(snap.visual_published, 1);
        assert_eq!(snap.visual_dropped, 1);
        assert_eq!(snap.idle_notifications, 1);
        assert!(snap.timestamp_ms > 0);
        assert!(snap.to_string().contains("Blocks: 2 (1 empty)"));
    }
}
