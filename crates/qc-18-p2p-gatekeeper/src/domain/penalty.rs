//! IP penalty tracking.
//!
//! Maps a remote IP to the instant of its last protocol violation. An IP is
//! penalized while that instant is younger than the penalty window. Entries
//! never expire individually: the whole table is cleared on a fixed cadence
//! by [`purge_task`], so an IP that violated just before a purge is
//! admissible again right after it.

use crate::ports::TimeSource;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared last-violation table, sharded by IP
pub struct IpPenaltyTracker {
    records: DashMap<IpAddr, Instant>,
    window: Duration,
    time: Arc<dyn TimeSource>,
}

impl IpPenaltyTracker {
    pub fn new(window: Duration, time: Arc<dyn TimeSource>) -> Self {
        Self {
            records: DashMap::new(),
            window,
            time,
        }
    }

    /// Record a violation for `ip` at the current instant.
    ///
    /// A record only ever moves forward in time.
    pub fn record_violation(&self, ip: IpAddr) {
        let ip = ip.to_canonical();
        let now = self.time.now();
        self.records
            .entry(ip)
            .and_modify(|last| {
                if now > *last {
                    *last = now;
                }
            })
            .or_insert(now);
        debug!(ip = %ip, "Recorded ip violation");
    }

    /// Whether `ip` violated within the penalty window
    pub fn is_penalized(&self, ip: &IpAddr) -> bool {
        let now = self.time.now();
        self.records
            .get(&ip.to_canonical())
            .is_some_and(|last| now.saturating_duration_since(*last) < self.window)
    }

    /// Clear every record
    pub fn purge_all(&self) -> usize {
        let purged = self.records.len();
        self.records.clear();
        purged
    }

    /// Number of tracked IPs
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Background task clearing the penalty table on a fixed cadence
pub async fn purge_task(tracker: Arc<IpPenaltyTracker>, interval: Duration) {
    let mut purge_interval = tokio::time::interval(interval);
    purge_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    purge_interval.tick().await;

    loop {
        purge_interval.tick().await;
        let purged = tracker.purge_all();
        info!(purged = purged, "Purged ip penalty table");
    }
}
