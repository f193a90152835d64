//! # Driven Ports (Outbound SPI)
//!
//! Interfaces the gatekeeper requires from its host: the coordinator process
//! that owns policy state, and a clock.

use crate::domain::config::PolicyConfig;
use crate::domain::error::CoordinatorError;
use crate::domain::handlers::HandlerCatalog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;

/// The external authority holding configuration, rate-limit state,
/// peer/forger registries and readiness.
///
/// Every method is one request/response round trip. Callers bound each call
/// with the configured coordinator timeout.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// connection task.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// `getConfig`: blacklist and per-subnet connection limit
    async fn get_config(&self) -> Result<PolicyConfig, CoordinatorError>;

    /// `getHandlers`: version → handler names served by this node
    async fn get_handlers(&self) -> Result<HandlerCatalog, CoordinatorError>;

    /// `isBlockedByRateLimit`: whether the IP is currently banned by the rate limiter
    async fn is_blocked_by_rate_limit(&self, ip: IpAddr) -> Result<bool, CoordinatorError>;

    /// `getRateLimitStatus`: whether the IP exceeded its limit on `endpoint`
    async fn get_rate_limit_status(
        &self,
        ip: IpAddr,
        endpoint: &str,
    ) -> Result<bool, CoordinatorError>;

    /// `isAppReady`: whether dependent subsystems finished initializing
    async fn is_app_ready(&self) -> Result<bool, CoordinatorError>;

    /// `isForgerAuthorized`: whether the IP belongs to an authorized block producer
    async fn is_forger_authorized(&self, ip: IpAddr) -> Result<bool, CoordinatorError>;

    /// `isPeerOrForger`: whether the IP is a recognized peer or authorized producer
    async fn is_peer_or_forger(&self, ip: IpAddr) -> Result<bool, CoordinatorError>;

    /// `acceptNewPeer`: register the caller as an accepted peer
    async fn accept_new_peer(
        &self,
        ip: IpAddr,
        headers: serde_json::Value,
    ) -> Result<(), CoordinatorError>;

    /// `log`: forward a log line to the coordinator
    async fn log(&self, level: LogLevel, message: String) -> Result<(), CoordinatorError>;

    /// Dispatch an accepted `p2p.<version>.<handler>` call. The response is
    /// passed to the peer unmodified.
    async fn dispatch(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CoordinatorError>;
}

/// Log level of a forwarded log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Abstract clock for the penalty and heartbeat windows.
///
/// Production uses [`SystemTimeSource`]; tests inject a manual clock.
pub trait TimeSource: Send + Sync {
    /// Current monotonic instant
    fn now(&self) -> Instant;
}

/// Monotonic system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
