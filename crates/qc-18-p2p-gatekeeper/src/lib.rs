//! QC-18 P2P Gatekeeper - connection admission and message validation in
//! front of the node's peer handlers.
//!
//! Untrusted peers connect over WebSocket and send JSON envelopes. Before any
//! application logic runs, the gatekeeper decides whether the connection may
//! be established, whether each frame is well-formed, and whether the sender
//! may call the requested operation. Policy state (rate limits, peer and
//! forger registries, readiness) lives in an external coordinator process and
//! is consulted asynchronously.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      P2P GATEKEEPER (qc-18)                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │   ws (axum)  ──upgrade──→  Admission                             │
//! │                              penalty → rate limit → blacklist    │
//! │                              → subnet density                    │
//! │   frames     ──────────→   Envelope                              │
//! │                              heartbeat / #handshake / #disconnect│
//! │                              shape → handler set → schema        │
//! │                          →  Authorization                        │
//! │                              endpoint limit → namespace → ready  │
//! │                              → forger / peer tier                │
//! │                          →  dispatch                             │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ IPC (correlated request/response)
//!                                 ▼
//!                            Coordinator
//! ```
//!
//! # Failure classes
//!
//! - **Admission rejection**: `403` before upgrade, no handshake
//! - **Protocol violation**: socket dropped, IP penalized for 60s
//! - **Authorization failure**: socket dropped, no penalty
//! - **Not ready**: `AppNotReadyError` response, socket stays open
//!
//! # Usage
//!
//! ```ignore
//! use qc_18_p2p_gatekeeper::{GatekeeperConfig, GatekeeperWorker, SystemTimeSource};
//! use qc_18_p2p_gatekeeper::domain::pending::PendingRequestStore;
//! use qc_18_p2p_gatekeeper::ipc::channel;
//!
//! let config = GatekeeperConfig::load("gatekeeper.toml")?;
//! let pending = Arc::new(PendingRequestStore::new(config.coordinator_timeout));
//! let (coordinator, listener, requests, responses) = channel::connect(pending, 1024);
//! tokio::spawn(listener.run());
//! coordinator.spawn_cleanup(config.pending_cleanup_interval);
//!
//! let coordinator = Arc::new(coordinator);
//! let worker = GatekeeperWorker::bootstrap(config, coordinator, Arc::new(SystemTimeSource)).await?;
//! let worker = Arc::new(worker);
//! worker.spawn_maintenance();
//! qc_18_p2p_gatekeeper::ws::bind_and_serve(worker).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod ipc;
pub mod middleware;
pub mod ports;
pub mod service;
pub mod telemetry;
pub mod ws;

/// Test doubles (ManualTimeSource, MockCoordinator)
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use domain::{
    AdmissionRejection, AuthorizationFailure, CallRejection, ConfigError, CoordinatorError,
    Disposition, GatekeeperConfig, GatekeeperError, PolicyConfig, TerminationReason, Violation,
};
pub use ipc::{IpcCoordinator, ResponseListener};
pub use ports::{Coordinator, LogLevel, SystemTimeSource, TimeSource};
pub use service::{Frame, FrameOutcome, GatekeeperState, GatekeeperWorker, PeerSession};

#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{ManualTimeSource, MockCoordinator};
