//! Windowed set of already-applied transaction ids
//!
//! Queue delivery is at-least-once: a crash or a failed delete after a
//! successful persist redelivers the same event. `ProcessedTransactions`
//! remembers which transaction ids were folded into an aggregate during the
//! last `window` and lets the use case skip replays instead of counting the
//! amount twice.
//!
//! The set is process-local and bounded in time, not in size. Entries older
//! than the window are ignored by lookups and removed by [`prune`].
//!
//! [`prune`]: ProcessedTransactions::prune

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::TransactionId;

/// Windowed deduplication set keyed by transaction id
#[derive(Debug)]
pub struct ProcessedTransactions {
    window: Duration,
    seen: DashMap<TransactionId, Instant>,
}

impl ProcessedTransactions {
    /// Create a set remembering ids for `window`
    ///
    /// A zero window disables deduplication entirely.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    /// A set that never reports duplicates
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `transaction_id` was recorded within the window
    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        if !self.is_enabled() {
            return false;
        }

        self.seen
            .get(&transaction_id)
            .map(|entry| entry.value().elapsed() <= self.window)
            .unwrap_or(false)
    }

    /// Remember `transaction_id` as applied now
    pub fn record(&self, transaction_id: TransactionId) {
        if self.is_enabled() {
            self.seen.insert(transaction_id, Instant::now());
        }
    }

    /// Drop entries that fell out of the window; returns how many were removed
    pub fn prune(&self) -> usize {
        let before = self.seen.len();
        let window = self.window;
        self.seen.retain(|_, recorded_at| recorded_at.elapsed() <= window);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for ProcessedTransactions {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_recorded_id_is_contained_within_window() {
        let processed = ProcessedTransactions::new(WINDOW);
        let tx = Uuid::now_v7();

        assert!(!processed.contains(tx));
        processed.record(tx);
        assert!(processed.contains(tx));

        tokio::time::advance(WINDOW).await;
        assert!(processed.contains(tx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_expires_after_window() {
        let processed = ProcessedTransactions::new(WINDOW);
        let tx = Uuid::now_v7();
        processed.record(tx);

        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;

        assert!(!processed.contains(tx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_only_expired_entries() {
        let processed = ProcessedTransactions::new(WINDOW);
        let old = Uuid::now_v7();
        let recent = Uuid::now_v7();

        processed.record(old);
        tokio::time::advance(Duration::from_secs(45)).await;
        processed.record(recent);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(processed.prune(), 1);
        assert_eq!(processed.len(), 1);
        assert!(processed.contains(recent));
    }

    #[test]
    fn test_disabled_set_never_reports_duplicates() {
        let processed = ProcessedTransactions::disabled();
        let tx = Uuid::now_v7();

        processed.record(tx);

        assert!(!processed.is_enabled());
        assert!(!processed.contains(tx));
        assert!(processed.is_empty());
    }
}
