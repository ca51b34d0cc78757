use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Pipeline-wide counters, shared by the publisher and every subscription.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    published: AtomicU64,
    publish_failures: AtomicU64,
    delivered: AtomicU64,
    redelivered: AtomicU64,
    decode_failures: AtomicU64,
    read_errors: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
    handler_failures: AtomicU64,
    unhandled_dropped: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub delivered: u64,
    pub redelivered: u64,
    /// Entries that could not be decoded. Unknown event types are not counted here.
    pub decode_failures: u64,
    pub read_errors: u64,
    pub acked: u64,
    pub ack_failures: u64,
    pub handler_failures: u64,
    /// Events dropped for lack of a handler, including entries of an unknown type.
    pub unhandled_dropped: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, n: usize) {
        self.delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_redelivered(&self, n: usize) {
        self.redelivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unhandled(&self) {
        self.unhandled_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            unhandled_dropped: self.unhandled_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = PipelineMetrics::new();
        metrics.record_published();
        metrics.record_published();
        metrics.record_delivered(3);
        metrics.record_unhandled();

        let snap = metrics.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.delivered, 3);
        assert_eq!(snap.unhandled_dropped, 1);
        assert_eq!(snap.acked, 0);

        let json = serde_json::to_value(snap).unwrap();
        assert_eq!(json["published"], 2);
    }
}
