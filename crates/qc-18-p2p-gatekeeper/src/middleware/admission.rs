//! Connection admission.
//!
//! Runs once per connection attempt, before the transport is upgraded.
//! Checks short-circuit in order:
//!
//! 1. IP penalized (recent protocol violation)
//! 2. Coordinator rate limiter blocks the IP
//! 3. IP on the static blacklist
//! 4. Subnet already hosts `maxSameSubnetPeers` live connections

use crate::domain::connection::ConnectionId;
use crate::domain::error::AdmissionRejection;
use crate::domain::subnet::SubnetKey;
use crate::middleware::bounded;
use crate::service::GatekeeperState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Live (handshaking or established) connections, keyed by connection
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, IpAddr>,
    // Serializes the subnet count with the insert it guards
    admission: Mutex<()>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection until the returned guard is dropped
    pub fn register(self: &Arc<Self>, id: ConnectionId, ip: IpAddr) -> Registration {
        self.connections.insert(id, ip.to_canonical());
        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Register `ip` unless its subnet already hosts `max` live connections.
    ///
    /// `max == 0` disables the limit.
    pub fn try_register(
        self: &Arc<Self>,
        id: ConnectionId,
        ip: IpAddr,
        max: usize,
    ) -> Result<Registration, AdmissionRejection> {
        if max == 0 {
            return Ok(self.register(id, ip));
        }

        let _guard = self.admission.lock();
        let subnet = SubnetKey::from_ip(&ip);
        let count = self.count_in_subnet(&subnet);
        if count >= max {
            return Err(AdmissionRejection::SubnetFlood { subnet, count, max });
        }
        Ok(self.register(id, ip))
    }

    /// Live connections inside `subnet`
    pub fn count_in_subnet(&self, subnet: &SubnetKey) -> usize {
        self.connections
            .iter()
            .filter(|entry| subnet.contains(entry.value()))
            .count()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Registry membership of one connection; deregisters on drop
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.connections.remove(&self.id);
    }
}

/// Decide whether connection `id` from `ip` may proceed to the handshake.
///
/// On success the connection already counts against its subnet.
pub async fn admit(
    state: &GatekeeperState,
    id: ConnectionId,
    ip: IpAddr,
) -> Result<Registration, AdmissionRejection> {
    let ip = ip.to_canonical();

    if state.penalties.is_penalized(&ip) {
        debug!(ip = %ip, "Rejected connection from penalized ip");
        return Err(AdmissionRejection::Penalized);
    }

    let blocked = bounded(
        state.config.coordinator_timeout,
        "isBlockedByRateLimit",
        state.coordinator.is_blocked_by_rate_limit(ip),
    )
    .await
    .map_err(|e| {
        error!(ip = %ip, error = %e, "Rate limiter unavailable during admission");
        AdmissionRejection::Coordinator(e)
    })?;
    if blocked {
        info!(ip = %ip, "Rejected connection blocked by rate limit");
        return Err(AdmissionRejection::RateLimited);
    }

    if state.policy.is_blacklisted(&ip) {
        info!(ip = %ip, "Rejected connection from blacklisted ip");
        return Err(AdmissionRejection::Blacklisted);
    }

    state
        .registry
        .try_register(id, ip, state.policy.max_same_subnet_peers)
        .inspect_err(|rejection| {
            info!(ip = %ip, reason = %rejection, "Rejected subnet flood");
        })
}
