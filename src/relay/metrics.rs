//! Advisory counters owned by the running relay.
//!
//! Nothing here is used for enforcement or billing.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    errors: AtomicU64,
    tokens: AtomicU64,
    provider_calls: AtomicU64,
    cancelled_calls: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub errors: u64,
    pub tokens: u64,
    pub provider_calls: u64,
    pub cancelled_calls: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, tokens: u64) {
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn record_provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled_call(&self) {
        self.cancelled_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            errors: self.errors.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            cancelled_calls: self.cancelled_calls.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter. Test hook; the server never calls this.
    pub fn reset(&self) {
        self.errors.store(0, Ordering::Relaxed);
        self.tokens.store(0, Ordering::Relaxed);
        self.provider_calls.store(0, Ordering::Relaxed);
        self.cancelled_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RelayMetrics::new();
        metrics.record_error();
        metrics.record_error();
        metrics.record_tokens(40);
        metrics.record_tokens(2);
        metrics.record_provider_call();
        metrics.record_cancelled_call();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                errors: 2,
                tokens: 42,
                provider_calls: 1,
                cancelled_calls: 1,
            }
        );
    }

    #[test]
    fn test_reset() {
        let metrics = RelayMetrics::new();
        metrics.record_error();
        metrics.record_tokens(10);
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[tokio::test]
    async fn test_concurrent_increments() {
        let metrics = Arc::new(RelayMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        metrics.record_error();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(metrics.snapshot().errors, 800);
    }
}
