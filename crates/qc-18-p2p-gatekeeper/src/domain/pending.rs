//! Pending coordinator requests.
//!
//! Flow:
//! 1. Caller calls `register()` and gets a correlation ID plus a oneshot receiver
//! 2. Caller sends the IPC request tagged with that correlation ID
//! 3. The response listener calls `complete()` when the answer arrives
//! 4. Caller awaits the receiver (bounded by a timeout)

use crate::domain::correlation::CorrelationId;
use crate::domain::error::CoordinatorError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Result delivered to a waiting caller
pub type CoordinatorResult = Result<serde_json::Value, CoordinatorError>;

struct PendingRequest {
    sender: oneshot::Sender<CoordinatorResult>,
    created_at: Instant,
    request: &'static str,
    timeout: Duration,
}

/// Counters for the pending store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_expired: AtomicU64,
    pub total_cancelled: AtomicU64,
}

/// Correlation ID → waiting caller
pub struct PendingRequestStore {
    pending: DashMap<CorrelationId, PendingRequest>,
    default_timeout: Duration,
    stats: PendingStats,
}

impl PendingRequestStore {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: PendingStats::default(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a pending request and get the receiver for its response
    pub fn register(
        &self,
        request: &'static str,
        timeout: Option<Duration>,
    ) -> (CorrelationId, oneshot::Receiver<CoordinatorResult>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            correlation_id,
            PendingRequest {
                sender: tx,
                created_at: Instant::now(),
                request,
                timeout: timeout.unwrap_or(self.default_timeout),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        (correlation_id, rx)
    }

    /// Deliver a response. Returns false for unknown, expired or abandoned requests.
    pub fn complete(&self, correlation_id: CorrelationId, result: CoordinatorResult) -> bool {
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation ID"
            );
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.sender.send(result).is_ok() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                request = pending.request,
                response_time_ms = elapsed.as_millis(),
                "Completed coordinator request"
            );
            true
        } else {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Drop a pending request (caller gave up)
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove requests older than their timeout. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|id, pending| {
            let elapsed = now.duration_since(pending.created_at);
            if elapsed > pending.timeout {
                warn!(
                    correlation_id = %id,
                    request = pending.request,
                    elapsed_ms = elapsed.as_millis(),
                    "Removing expired coordinator request"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .total_expired
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

/// Background task removing expired pending requests
pub async fn cleanup_task(store: Arc<PendingRequestStore>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed = removed, "Cleaned up expired coordinator requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_complete() {
        let store = PendingRequestStore::new(Duration::from_secs(30));

        let (id, rx) = store.register("isAppReady", None);
        assert!(store.is_pending(&id));

        assert!(store.complete(id, Ok(serde_json::json!({"ready": true}))));
        assert_eq!(rx.await.unwrap().unwrap()["ready"], true);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.stats().total_completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_complete_unknown_id() {
        let store = PendingRequestStore::new(Duration::from_secs(30));
        assert!(!store.complete(CorrelationId::new(), Ok(serde_json::Value::Null)));
    }

    #[test]
    fn test_complete_after_receiver_dropped() {
        let store = PendingRequestStore::new(Duration::from_secs(30));
        let (id, rx) = store.register("getConfig", None);
        drop(rx);

        assert!(!store.complete(id, Ok(serde_json::Value::Null)));
        assert_eq!(store.stats().total_cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancel() {
        let store = PendingRequestStore::new(Duration::from_secs(30));
        let (id, _rx) = store.register("getHandlers", None);

        assert!(store.cancel(&id));
        assert!(!store.cancel(&id));
        assert!(!store.is_pending(&id));
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let store = PendingRequestStore::new(Duration::from_secs(30));
        let (_short, _rx1) = store.register("isAppReady", Some(Duration::from_millis(5)));
        let (long, _rx2) = store.register("isAppReady", None);

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.remove_expired(), 1);
        assert!(store.is_pending(&long));
        assert_eq!(store.stats().total_expired.load(Ordering::Relaxed), 1);
    }
}
