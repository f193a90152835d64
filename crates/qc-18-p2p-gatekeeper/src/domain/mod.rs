//! Domain types for the P2P gatekeeper.
//!
//! Pure state and rules: configuration, the error taxonomy, connection
//! lifecycle, penalty tracking, operation names and payload schemas.

pub mod config;
pub mod connection;
pub mod correlation;
pub mod error;
pub mod handlers;
pub mod pending;
pub mod penalty;
pub mod schema;
pub mod subnet;

pub use config::{ConfigError, GatekeeperConfig, PolicyConfig};
pub use connection::{ConnectionId, ConnectionState, PeerConnection};
pub use correlation::CorrelationId;
pub use error::{
    AdmissionRejection, AuthorizationFailure, CallRejection, CoordinatorError, Disposition,
    GatekeeperError, TerminationReason, Violation,
};
pub use handlers::{ApiVersion, HandlerCatalog, HandlerRegistry, Operation};
pub use penalty::IpPenaltyTracker;
pub use schema::{SchemaValidator, SchemaViolation};
pub use subnet::SubnetKey;
