//! Requests sent to the coordinator process.

use crate::domain::correlation::CorrelationId;
use crate::ports::LogLevel;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Present when a response is expected; fire-and-forget requests carry none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Request payload
    pub payload: CoordinatorRequest,
}

impl IpcRequest {
    pub fn with_correlation_id(correlation_id: CorrelationId, payload: CoordinatorRequest) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            payload,
        }
    }

    pub fn notification(payload: CoordinatorRequest) -> Self {
        Self {
            correlation_id: None,
            payload,
        }
    }
}

/// Every call the gatekeeper makes to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum CoordinatorRequest {
    GetConfig,
    GetHandlers,
    IsBlockedByRateLimit {
        ip: IpAddr,
    },
    GetRateLimitStatus {
        ip: IpAddr,
        endpoint: String,
    },
    IsAppReady,
    IsForgerAuthorized {
        ip: IpAddr,
    },
    IsPeerOrForger {
        ip: IpAddr,
    },
    AcceptNewPeer {
        ip: IpAddr,
        headers: serde_json::Value,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    /// An accepted `p2p.<version>.<handler>` call
    Dispatch {
        event: String,
        payload: serde_json::Value,
    },
}

impl CoordinatorRequest {
    /// Method name, for logs and pending-request bookkeeping
    pub fn method(&self) -> &'static str {
        match self {
            CoordinatorRequest::GetConfig => "getConfig",
            CoordinatorRequest::GetHandlers => "getHandlers",
            CoordinatorRequest::IsBlockedByRateLimit { .. } => "isBlockedByRateLimit",
            CoordinatorRequest::GetRateLimitStatus { .. } => "getRateLimitStatus",
            CoordinatorRequest::IsAppReady => "isAppReady",
            CoordinatorRequest::IsForgerAuthorized { .. } => "isForgerAuthorized",
            CoordinatorRequest::IsPeerOrForger { .. } => "isPeerOrForger",
            CoordinatorRequest::AcceptNewPeer { .. } => "acceptNewPeer",
            CoordinatorRequest::Log { .. } => "log",
            CoordinatorRequest::Dispatch { .. } => "dispatch",
        }
    }
}
