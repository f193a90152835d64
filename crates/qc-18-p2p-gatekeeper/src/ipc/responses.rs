//! Responses from the coordinator process.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::CoordinatorError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Correlation ID of the request being answered
    pub correlation_id: CorrelationId,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResponsePayload {
    Success(serde_json::Value),
    Error(ErrorData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    pub message: String,
}

impl IpcResponse {
    pub fn success(correlation_id: CorrelationId, data: serde_json::Value) -> Self {
        Self {
            correlation_id,
            payload: ResponsePayload::Success(data),
        }
    }

    pub fn error(correlation_id: CorrelationId, code: i32, message: impl Into<String>) -> Self {
        Self {
            correlation_id,
            payload: ResponsePayload::Error(ErrorData {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn into_result(self) -> Result<serde_json::Value, CoordinatorError> {
        match self.payload {
            ResponsePayload::Success(data) => Ok(data),
            ResponsePayload::Error(e) => Err(CoordinatorError::Remote {
                code: e.code,
                message: e.message,
            }),
        }
    }
}

/// `getConfig`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub max_same_subnet_peers: usize,
}

/// `isBlockedByRateLimit`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub blocked: bool,
}

/// `getRateLimitStatus`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub exceeded_limit_on_endpoint: bool,
}

/// `isAppReady`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// `isForgerAuthorized`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthorizedResponse {
    pub authorized: bool,
}

/// `isPeerOrForger`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerOrForgerResponse {
    pub is_peer_or_forger: bool,
}

/// Decode a coordinator result into its typed response
pub fn decode<T: DeserializeOwned>(
    method: &'static str,
    value: serde_json::Value,
) -> Result<T, CoordinatorError> {
    serde_json::from_value(value)
        .map_err(|e| CoordinatorError::MalformedResponse(format!("{method}: {e}")))
}
