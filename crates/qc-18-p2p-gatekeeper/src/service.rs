//! Gatekeeper worker.
//!
//! Owns the shared state and drives each connection through the pipeline:
//!
//! ```text
//! connect ──→ admission ──→ PeerSession::handle_frame (per frame, in order)
//!                               │
//!                               ├─ envelope ──→ heartbeat / #handshake / #disconnect
//!                               └─ envelope ──→ authorization ──→ coordinator dispatch
//! ```
//!
//! The worker never touches sockets. Transport adapters feed it frames and
//! apply the returned [`FrameOutcome`].

use crate::domain::config::{GatekeeperConfig, PolicyConfig};
use crate::domain::connection::{ConnectionId, PeerConnection};
use crate::domain::error::{
    AdmissionRejection, CallRejection, Disposition, GatekeeperError, TerminationReason, Violation,
};
use crate::domain::handlers::HandlerRegistry;
use crate::domain::penalty::{self, IpPenaltyTracker};
use crate::domain::schema::SchemaValidator;
use crate::middleware::{admission, authorization, bounded};
use crate::middleware::{ConnectionRegistry, Envelope, EnvelopeValidator, Registration};
use crate::ports::{Coordinator, LogLevel, TimeSource};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State shared by every connection
pub struct GatekeeperState {
    pub config: GatekeeperConfig,
    pub policy: PolicyConfig,
    pub envelope: EnvelopeValidator,
    pub penalties: Arc<IpPenaltyTracker>,
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: Arc<dyn Coordinator>,
    pub time: Arc<dyn TimeSource>,
}

/// Connection admission and frame validation front end
pub struct GatekeeperWorker {
    state: Arc<GatekeeperState>,
}

impl GatekeeperWorker {
    /// Load policy and handlers from the coordinator.
    ///
    /// Nothing is admitted before this returns.
    pub async fn bootstrap(
        config: GatekeeperConfig,
        coordinator: Arc<dyn Coordinator>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, GatekeeperError> {
        config.validate()?;
        let limit = config.coordinator_timeout;

        let policy = bounded(limit, "getConfig", coordinator.get_config()).await?;
        let catalog = bounded(limit, "getHandlers", coordinator.get_handlers()).await?;
        let handlers = HandlerRegistry::from_catalog(&catalog);

        info!(
            handlers = handlers.len(),
            blacklisted = policy.blacklist.len(),
            max_same_subnet_peers = policy.max_same_subnet_peers,
            "Gatekeeper policy loaded"
        );

        let envelope = EnvelopeValidator::new(&config, handlers, SchemaValidator::builtin());
        let penalties = Arc::new(IpPenaltyTracker::new(
            config.penalty_window,
            Arc::clone(&time),
        ));

        Ok(Self {
            state: Arc::new(GatekeeperState {
                config,
                policy,
                envelope,
                penalties,
                registry: Arc::new(ConnectionRegistry::new()),
                coordinator,
                time,
            }),
        })
    }

    pub fn state(&self) -> &Arc<GatekeeperState> {
        &self.state
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.state.config
    }

    /// Spawn the periodic penalty purge
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        tokio::spawn(penalty::purge_task(
            Arc::clone(&self.state.penalties),
            self.state.config.penalty_purge_interval,
        ))
    }

    /// Run admission for a new connection from `remote`
    pub async fn admit(&self, remote: SocketAddr) -> Result<PeerSession, AdmissionRejection> {
        let id = ConnectionId::next();
        let registration = admission::admit(&self.state, id, remote.ip()).await?;

        let mut connection = PeerConnection::new(id, remote);
        connection.admit();
        debug!(connection = %id, remote = %remote, "Connection admitted");

        Ok(PeerSession {
            state: Arc::clone(&self.state),
            connection,
            _registration: registration,
        })
    }
}

/// A raw inbound frame as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
}

/// What the transport must do after a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Keep reading
    Continue,
    /// Send this text frame, then keep reading
    Reply(String),
    /// Close gracefully
    Close,
    /// Drop the socket without a response
    Terminate(TerminationReason),
}

/// One admitted connection. Dropping it releases its subnet slot.
pub struct PeerSession {
    state: Arc<GatekeeperState>,
    connection: PeerConnection,
    _registration: Registration,
}

impl PeerSession {
    pub fn connection(&self) -> &PeerConnection {
        &self.connection
    }

    /// Run one frame through the pipeline. Frames must be fed in arrival order.
    pub async fn handle_frame(&mut self, frame: Frame) -> FrameOutcome {
        if self.connection.is_terminated() || self.connection.disconnect_requested() {
            return FrameOutcome::Close;
        }

        let bytes = match &frame {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes.as_slice(),
            Frame::Ping => return self.terminate(Violation::ControlFrame("ping").into()),
            Frame::Pong => return self.terminate(Violation::ControlFrame("pong").into()),
        };

        let now = self.state.time.now();
        let classified = self
            .state
            .envelope
            .classify(&mut self.connection, bytes, now);
        let envelope = match classified {
            Ok(envelope) => envelope,
            Err(violation) => return self.terminate(TerminationReason::Violation(violation)),
        };

        match envelope {
            Envelope::Heartbeat => FrameOutcome::Continue,
            Envelope::Handshake => {
                debug!(
                    connection = %self.connection.id(),
                    ip = %self.connection.ip(),
                    "Handshake completed"
                );
                FrameOutcome::Continue
            }
            Envelope::Disconnect => {
                debug!(connection = %self.connection.id(), "Peer announced disconnect");
                self.connection.terminate();
                FrameOutcome::Close
            }
            Envelope::Call(call) => {
                let cid = call.cid.clone();
                let event = call.event.clone();
                let remote = self.connection.remote();
                match authorization::authorize(&self.state, remote, call).await {
                    Ok(result) => match cid {
                        Some(cid) => {
                            FrameOutcome::Reply(json!({"rid": cid, "data": result}).to_string())
                        }
                        None => FrameOutcome::Continue,
                    },
                    Err(rejection) => self.reject(&event, cid, rejection),
                }
            }
        }
    }

    fn reject(
        &mut self,
        event: &str,
        cid: Option<Value>,
        rejection: CallRejection,
    ) -> FrameOutcome {
        match rejection.disposition() {
            Disposition::Respond => {
                info!(
                    ip = %self.connection.ip(),
                    event = event,
                    error = %rejection,
                    "Call answered with error"
                );
                match (cid, rejection.response_name()) {
                    (Some(cid), Some(name)) => {
                        let error = json!({"name": name, "message": rejection.to_string()});
                        FrameOutcome::Reply(json!({"rid": cid, "error": error}).to_string())
                    }
                    _ => FrameOutcome::Continue,
                }
            }
            Disposition::Terminate { .. } | Disposition::Drop => {
                match rejection.into_termination() {
                    Some(reason) => self.terminate(reason),
                    None => FrameOutcome::Continue,
                }
            }
        }
    }

    fn terminate(&mut self, reason: TerminationReason) -> FrameOutcome {
        let id = self.connection.id();
        let ip = self.connection.ip();
        self.connection.terminate();

        if reason.records_violation() {
            self.state.penalties.record_violation(ip);
        }

        match &reason {
            TerminationReason::Violation(violation) => {
                warn!(connection = %id, ip = %ip, reason = %violation, "Protocol violation");
                self.mirror_log(LogLevel::Warn, format!("{ip} terminated: {violation}"));
            }
            TerminationReason::Unauthorized(failure) => {
                info!(connection = %id, ip = %ip, reason = %failure, "Unauthorized call");
            }
            TerminationReason::Coordinator(err) => {
                error!(connection = %id, ip = %ip, error = %err, "Coordinator failure");
            }
        }

        FrameOutcome::Terminate(reason)
    }

    /// Forward a log line to the coordinator without waiting
    fn mirror_log(&self, level: LogLevel, message: String) {
        let coordinator = Arc::clone(&self.state.coordinator);
        let limit = self.state.config.coordinator_timeout;
        tokio::spawn(async move {
            if let Err(e) = bounded(limit, "log", coordinator.log(level, message)).await {
                debug!(error = %e, "Coordinator log delivery failed");
            }
        });
    }
}
