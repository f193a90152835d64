//! Request authorization and dispatch.
//!
//! Runs per structured call after the envelope is accepted. Short-circuits on
//! the first failure:
//!
//! 1. Operation name too long
//! 2. Endpoint rate limit exceeded (coordinator)
//! 3. `data.data` / `data.headers` not both objects
//! 4. Namespace other than `p2p`
//! 5. App not ready (recoverable)
//! 6. Version tier: `internal` needs an authorized forger, privileged `peer`
//!    handlers need a known peer or forger, other `peer` handlers are
//!    schema-checked; any other version is refused
//! 7. Dispatch with the caller's address attached to the headers

use crate::domain::error::{AuthorizationFailure, CallRejection, Violation};
use crate::domain::handlers::{ApiVersion, Operation, NAMESPACE};
use crate::middleware::bounded;
use crate::middleware::envelope::Call;
use crate::service::GatekeeperState;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header carrying the caller's resolved address
pub const REMOTE_ADDRESS_HEADER: &str = "remoteAddress";

/// Authorize `call` from `remote` and dispatch it to the coordinator.
///
/// The coordinator's response is returned unmodified.
pub async fn authorize(
    state: &Arc<GatekeeperState>,
    remote: SocketAddr,
    call: Call,
) -> Result<Value, CallRejection> {
    let ip = remote.ip().to_canonical();
    let limit = state.config.coordinator_timeout;

    let len = call.event.chars().count();
    if len > state.config.max_operation_len {
        return Err(Violation::OperationTooLong {
            len,
            max: state.config.max_operation_len,
        }
        .into());
    }

    let exceeded = bounded(
        limit,
        "getRateLimitStatus",
        state.coordinator.get_rate_limit_status(ip, &call.event),
    )
    .await?;
    if exceeded {
        return Err(AuthorizationFailure::EndpointRateLimited(call.event).into());
    }

    let Call { event, mut data, .. } = call;
    if !data.get("data").is_some_and(Value::is_object) {
        return Err(Violation::InvalidData.into());
    }
    if !data.get("headers").is_some_and(Value::is_object) {
        return Err(Violation::Headers("headers must be an object".into()).into());
    }

    let operation = Operation::parse(&event)?;
    if operation.namespace != NAMESPACE {
        return Err(Violation::WrongNamespace(operation.namespace.to_string()).into());
    }

    let ready = bounded(limit, "isAppReady", state.coordinator.is_app_ready()).await?;
    if !ready {
        return Err(CallRejection::NotReady);
    }

    match operation.api_version() {
        Some(ApiVersion::Internal) => {
            let authorized = bounded(
                limit,
                "isForgerAuthorized",
                state.coordinator.is_forger_authorized(ip),
            )
            .await?;
            if !authorized {
                return Err(AuthorizationFailure::ForgerNotAuthorized.into());
            }
        }
        Some(ApiVersion::Peer) => {
            if operation.is_privileged_peer_call() {
                let known = bounded(
                    limit,
                    "isPeerOrForger",
                    state.coordinator.is_peer_or_forger(ip),
                )
                .await?;
                if !known {
                    return Err(AuthorizationFailure::NotPeerOrForger.into());
                }
            } else if let Some(payload) = data.get("data") {
                state
                    .envelope
                    .schemas()
                    .validate(operation.version, operation.handler, payload)
                    .map_err(Violation::from)?;
            }
            let headers = data.get("headers").cloned().unwrap_or_default();
            spawn_accept_new_peer(state, ip, headers);
        }
        None => {
            let version = operation.version.to_string();
            return Err(AuthorizationFailure::UnsupportedVersion(version).into());
        }
    }

    if let Some(Value::Object(headers)) = data.get_mut("headers") {
        headers.insert(
            REMOTE_ADDRESS_HEADER.to_string(),
            Value::String(ip.to_string()),
        );
    }

    debug!(ip = %ip, event = %event, "Dispatching call");
    let response = bounded(
        limit,
        "dispatch",
        state.coordinator.dispatch(&event, Value::Object(data)),
    )
    .await?;
    Ok(response)
}

/// Register the caller as an accepted peer without waiting for the outcome
fn spawn_accept_new_peer(state: &Arc<GatekeeperState>, ip: IpAddr, headers: Value) {
    let coordinator = Arc::clone(&state.coordinator);
    let limit = state.config.coordinator_timeout;
    tokio::spawn(async move {
        let accepted = coordinator.accept_new_peer(ip, headers);
        if let Err(e) = bounded(limit, "acceptNewPeer", accepted).await {
            warn!(ip = %ip, error = %e, "acceptNewPeer failed");
        }
    });
}
