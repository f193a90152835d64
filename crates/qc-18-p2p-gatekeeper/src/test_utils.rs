//! Test utilities for the gatekeeper.
//!
//! Deterministic doubles for the outbound ports. Enable with the `test-utils`
//! feature flag.
//!
//! # Example
//!
//! ```rust
//! use qc_18_p2p_gatekeeper::test_utils::ManualTimeSource;
//! use qc_18_p2p_gatekeeper::TimeSource;
//! use std::time::Duration;
//!
//! let time = ManualTimeSource::new();
//! let start = time.now();
//! time.advance(Duration::from_secs(5));
//! assert_eq!(time.now() - start, Duration::from_secs(5));
//! ```

use crate::domain::config::PolicyConfig;
use crate::domain::error::CoordinatorError;
use crate::domain::handlers::HandlerCatalog;
use crate::ipc::CoordinatorRequest;
use crate::ports::outbound::{Coordinator, LogLevel, TimeSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualTimeSource {
    now: Arc<Mutex<Instant>>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Handler catalog with every built-in peer and internal handler
pub fn default_catalog() -> HandlerCatalog {
    let mut catalog = HandlerCatalog::new();
    catalog.insert(
        "peer".into(),
        [
            "getPeers",
            "getStatus",
            "getBlocks",
            "getCommonBlocks",
            "postBlock",
            "postTransactions",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    catalog.insert(
        "internal".into(),
        [
            "emitEvent",
            "getUnconfirmedTransactions",
            "getCurrentRound",
            "getNetworkState",
            "syncBlockchain",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    catalog
}

/// Scriptable coordinator that records every call it receives.
///
/// Defaults: ready, nothing blocked or rate limited, caller is neither a
/// peer nor a forger, dispatch answers `{"ok": true}`.
pub struct MockCoordinator {
    policy: Mutex<PolicyConfig>,
    handlers: Mutex<HandlerCatalog>,
    ready: AtomicBool,
    blocked: AtomicBool,
    endpoint_limited: AtomicBool,
    forger_authorized: AtomicBool,
    peer_or_forger: AtomicBool,
    accept_fails: AtomicBool,
    log_stalls: AtomicBool,
    failure: Mutex<Option<CoordinatorError>>,
    response: Mutex<serde_json::Value>,
    calls: Mutex<Vec<CoordinatorRequest>>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self {
            policy: Mutex::new(PolicyConfig::default()),
            handlers: Mutex::new(default_catalog()),
            ready: AtomicBool::new(true),
            blocked: AtomicBool::new(false),
            endpoint_limited: AtomicBool::new(false),
            forger_authorized: AtomicBool::new(false),
            peer_or_forger: AtomicBool::new(false),
            accept_fails: AtomicBool::new(false),
            log_stalls: AtomicBool::new(false),
            failure: Mutex::new(None),
            response: Mutex::new(serde_json::json!({"ok": true})),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_policy(self, policy: PolicyConfig) -> Self {
        *self.policy.lock() = policy;
        self
    }

    pub fn with_handlers(self, handlers: HandlerCatalog) -> Self {
        *self.handlers.lock() = handlers;
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn set_endpoint_limited(&self, limited: bool) {
        self.endpoint_limited.store(limited, Ordering::SeqCst);
    }

    pub fn set_forger_authorized(&self, authorized: bool) {
        self.forger_authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn set_peer_or_forger(&self, known: bool) {
        self.peer_or_forger.store(known, Ordering::SeqCst);
    }

    pub fn set_accept_fails(&self, fails: bool) {
        self.accept_fails.store(fails, Ordering::SeqCst);
    }

    /// Make `log` hang forever after recording the line
    pub fn set_log_stalls(&self, stalls: bool) {
        self.log_stalls.store(stalls, Ordering::SeqCst);
    }

    /// Make every answering call fail with `err` (`None` restores normal answers)
    pub fn set_failure(&self, err: Option<CoordinatorError>) {
        *self.failure.lock() = err;
    }

    pub fn set_response(&self, response: serde_json::Value) {
        *self.response.lock() = response;
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<CoordinatorRequest> {
        self.calls.lock().clone()
    }

    /// Number of calls to `method` (e.g. `"dispatch"`)
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    fn record(&self, call: CoordinatorRequest) -> Result<(), CoordinatorError> {
        self.calls.lock().push(call);
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Coordinator for MockCoordinator {
    async fn get_config(&self) -> Result<PolicyConfig, CoordinatorError> {
        self.record(CoordinatorRequest::GetConfig)?;
        Ok(self.policy.lock().clone())
    }

    async fn get_handlers(&self) -> Result<HandlerCatalog, CoordinatorError> {
        self.record(CoordinatorRequest::GetHandlers)?;
        Ok(self.handlers.lock().clone())
    }

    async fn is_blocked_by_rate_limit(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        self.record(CoordinatorRequest::IsBlockedByRateLimit { ip })?;
        Ok(self.blocked.load(Ordering::SeqCst))
    }

    async fn get_rate_limit_status(
        &self,
        ip: IpAddr,
        endpoint: &str,
    ) -> Result<bool, CoordinatorError> {
        self.record(CoordinatorRequest::GetRateLimitStatus {
            ip,
            endpoint: endpoint.to_string(),
        })?;
        Ok(self.endpoint_limited.load(Ordering::SeqCst))
    }

    async fn is_app_ready(&self) -> Result<bool, CoordinatorError> {
        self.record(CoordinatorRequest::IsAppReady)?;
        Ok(self.ready.load(Ordering::SeqCst))
    }

    async fn is_forger_authorized(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        self.record(CoordinatorRequest::IsForgerAuthorized { ip })?;
        Ok(self.forger_authorized.load(Ordering::SeqCst))
    }

    async fn is_peer_or_forger(&self, ip: IpAddr) -> Result<bool, CoordinatorError> {
        self.record(CoordinatorRequest::IsPeerOrForger { ip })?;
        Ok(self.peer_or_forger.load(Ordering::SeqCst))
    }

    async fn accept_new_peer(
        &self,
        ip: IpAddr,
        headers: serde_json::Value,
    ) -> Result<(), CoordinatorError> {
        self.calls
            .lock()
            .push(CoordinatorRequest::AcceptNewPeer { ip, headers });
        if self.accept_fails.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Remote {
                code: -32000,
                message: "peer rejected".into(),
            });
        }
        Ok(())
    }

    async fn log(&self, level: LogLevel, message: String) -> Result<(), CoordinatorError> {
        self.calls
            .lock()
            .push(CoordinatorRequest::Log { level, message });
        if self.log_stalls.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, CoordinatorError> {
        self.record(CoordinatorRequest::Dispatch {
            event: operation.to_string(),
            payload,
        })?;
        Ok(self.response.lock().clone())
    }
}
