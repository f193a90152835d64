//! Gatekeeper error taxonomy.
//!
//! Every rejection maps to a [`Disposition`] telling the transport what to do
//! with the connection:
//!
//! | Class                      | Disposition                          |
//! |----------------------------|--------------------------------------|
//! | Admission rejection        | `Drop` (no handshake, no response)   |
//! | Protocol violation         | `Terminate`, IP violation recorded   |
//! | Authorization failure      | `Terminate`, nothing recorded        |
//! | Coordinator failure        | `Terminate`, nothing recorded        |
//! | Transient unavailability   | `Respond` with a recoverable error   |

use crate::domain::config::ConfigError;
use crate::domain::schema::SchemaViolation;
use crate::domain::subnet::SubnetKey;

/// Error names sent back to peers in structured error responses
pub mod names {
    /// Application subsystems are still starting up
    pub const APP_NOT_READY: &str = "AppNotReadyError";
}

/// Top-level gatekeeper errors (startup, server lifecycle)
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Coordinator could not be consulted
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Server I/O error
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a coordinator round trip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// No answer within the configured bound
    #[error("coordinator request {0} timed out")]
    Timeout(&'static str),

    /// IPC channel is gone
    #[error("coordinator channel closed")]
    ChannelClosed,

    /// Request could not be handed to the IPC channel
    #[error("coordinator send failed: {0}")]
    SendFailed(String),

    /// Coordinator answered with an error
    #[error("coordinator error [{code}]: {message}")]
    Remote { code: i32, message: String },

    /// Coordinator answered with an unexpected shape
    #[error("malformed coordinator response: {0}")]
    MalformedResponse(String),
}

/// Reasons a connection attempt is refused before the handshake
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionRejection {
    /// IP recorded a violation inside the penalty window
    #[error("ip is penalized")]
    Penalized,

    /// Coordinator's rate limiter is blocking this IP
    #[error("ip is blocked by rate limit")]
    RateLimited,

    /// IP is on the static blacklist
    #[error("ip is blacklisted")]
    Blacklisted,

    /// Too many connections from the same subnet
    #[error("subnet {subnet} already hosts {count} connections (max {max})")]
    SubnetFlood {
        subnet: SubnetKey,
        count: usize,
        max: usize,
    },

    /// Rate limiter could not be consulted
    #[error("admission check failed: {0}")]
    Coordinator(CoordinatorError),
}

/// Malformed or abusive traffic. Always terminates and records an IP violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("frame of {len} bytes is below the minimum length")]
    FrameTooShort { len: usize },

    #[error("frame of {len} bytes exceeds the maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("heartbeat received too soon after the previous one")]
    HeartbeatFlood,

    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    #[error("frame is not a json object")]
    MalformedJson,

    #[error("handshake already completed")]
    HandshakeReplay,

    #[error("call received before handshake")]
    HandshakeRequired,

    #[error("unexpected top-level key: {0}")]
    UnexpectedKey(String),

    #[error("event must be a string")]
    InvalidEvent,

    #[error("data must be an object")]
    InvalidData,

    #[error("cid must be a number")]
    InvalidCid,

    #[error("malformed operation name: {0}")]
    MalformedOperation(String),

    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    #[error("unexpected data key: {0}")]
    UnexpectedDataKey(String),

    #[error("payload rejected: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("invalid headers: {0}")]
    Headers(String),

    #[error("operation name of {len} chars exceeds {max}")]
    OperationTooLong { len: usize, max: usize },

    #[error("namespace {0} is not served")]
    WrongNamespace(String),

    #[error("transport control frame at application layer: {0}")]
    ControlFrame(&'static str),
}

/// Policy denials. Terminate without recording a violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationFailure {
    #[error("rate limit exceeded on {0}")]
    EndpointRateLimited(String),

    #[error("caller is not an authorized forger")]
    ForgerNotAuthorized,

    #[error("caller is neither a known peer nor a forger")]
    NotPeerOrForger,

    #[error("version {0} is not served")]
    UnsupportedVersion(String),
}

/// Outcome of a rejected structured call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallRejection {
    /// Application not ready yet. The only recoverable rejection.
    #[error("app is not ready")]
    NotReady,

    #[error(transparent)]
    Violation(#[from] Violation),

    #[error(transparent)]
    Unauthorized(#[from] AuthorizationFailure),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// What the transport must do with a connection after a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Refuse the raw connection before upgrade
    Drop,
    /// Close the live socket without a response
    Terminate { record_violation: bool },
    /// Keep the socket open and answer with an error
    Respond,
}

impl AdmissionRejection {
    pub fn disposition(&self) -> Disposition {
        Disposition::Drop
    }
}

impl CallRejection {
    pub fn disposition(&self) -> Disposition {
        match self {
            CallRejection::NotReady => Disposition::Respond,
            CallRejection::Violation(_) => Disposition::Terminate {
                record_violation: true,
            },
            CallRejection::Unauthorized(_) | CallRejection::Coordinator(_) => {
                Disposition::Terminate {
                    record_violation: false,
                }
            }
        }
    }

    /// Error name for the structured response, if this rejection is answered
    pub fn response_name(&self) -> Option<&'static str> {
        match self {
            CallRejection::NotReady => Some(names::APP_NOT_READY),
            _ => None,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TerminationReason {
    #[error("protocol violation: {0}")]
    Violation(Violation),

    #[error("authorization failure: {0}")]
    Unauthorized(AuthorizationFailure),

    #[error("coordinator failure: {0}")]
    Coordinator(CoordinatorError),
}

impl From<Violation> for TerminationReason {
    fn from(violation: Violation) -> Self {
        TerminationReason::Violation(violation)
    }
}

impl TerminationReason {
    pub fn disposition(&self) -> Disposition {
        Disposition::Terminate {
            record_violation: matches!(self, TerminationReason::Violation(_)),
        }
    }

    pub fn records_violation(&self) -> bool {
        matches!(
            self.disposition(),
            Disposition::Terminate {
                record_violation: true
            }
        )
    }
}

impl CallRejection {
    /// Termination reason for this rejection; `None` keeps the connection open
    pub fn into_termination(self) -> Option<TerminationReason> {
        match self {
            CallRejection::NotReady => None,
            CallRejection::Violation(v) => Some(TerminationReason::Violation(v)),
            CallRejection::Unauthorized(a) => Some(TerminationReason::Unauthorized(a)),
            CallRejection::Coordinator(c) => Some(TerminationReason::Coordinator(c)),
        }
    }
}
