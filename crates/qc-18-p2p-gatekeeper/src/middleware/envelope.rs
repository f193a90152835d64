//! Envelope validation.
//!
//! Classifies every raw frame as a heartbeat, a control event or a structured
//! call, rejecting anything else as a [`Violation`]. A frame that fails here
//! never reaches the coordinator.
//!
//! Call envelope:
//!
//! ```text
//! { "event": "p2p.<version>.<handler>",
//!   "data": { "data"?: {...}, "headers"?: { "version"?, "port"?, "height"?, "Content-Type"? } },
//!   "cid"?: number }
//! ```

use crate::domain::config::GatekeeperConfig;
use crate::domain::connection::PeerConnection;
use crate::domain::error::Violation;
use crate::domain::handlers::{HandlerRegistry, Operation};
use crate::domain::schema::SchemaValidator;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Bare heartbeat token
pub const HEARTBEAT: &[u8] = b"#2";
/// Handshake-announce event
pub const HANDSHAKE_EVENT: &str = "#handshake";
/// Disconnect-announce event
pub const DISCONNECT_EVENT: &str = "#disconnect";

const ENVELOPE_KEYS: [&str; 3] = ["event", "data", "cid"];
const DATA_KEYS: [&str; 2] = ["data", "headers"];

/// A classified frame
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Heartbeat,
    Handshake,
    Disconnect,
    Call(Call),
}

/// A structurally valid application call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Fully-qualified operation name
    pub event: String,
    /// The `data` object (`data` and/or `headers`)
    pub data: Map<String, Value>,
    /// Call id; a response is expected only when present
    pub cid: Option<Value>,
}

impl Call {
    pub fn operation(&self) -> Result<Operation<'_>, Violation> {
        Operation::parse(&self.event)
    }

    pub fn payload(&self) -> Option<&Value> {
        self.data.get("data")
    }

    pub fn headers(&self) -> Option<&Value> {
        self.data.get("headers")
    }
}

/// Wire-level framing and envelope rules
#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    handlers: HandlerRegistry,
    schemas: SchemaValidator,
    min_frame_len: usize,
    max_frame_size: usize,
    heartbeat_min_interval: Duration,
}

impl EnvelopeValidator {
    pub fn new(
        config: &GatekeeperConfig,
        handlers: HandlerRegistry,
        schemas: SchemaValidator,
    ) -> Self {
        Self {
            handlers,
            schemas,
            min_frame_len: config.min_frame_len,
            max_frame_size: config.max_frame_size,
            heartbeat_min_interval: config.heartbeat_min_interval,
        }
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn schemas(&self) -> &SchemaValidator {
        &self.schemas
    }

    /// Classify one raw frame received on `conn` at `now`
    pub fn classify(
        &self,
        conn: &mut PeerConnection,
        frame: &[u8],
        now: Instant,
    ) -> Result<Envelope, Violation> {
        if frame == HEARTBEAT {
            return self.heartbeat(conn, now);
        }
        if frame.len() < self.min_frame_len {
            return Err(Violation::FrameTooShort { len: frame.len() });
        }
        if frame.len() > self.max_frame_size {
            return Err(Violation::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame_size,
            });
        }

        let text = std::str::from_utf8(frame).map_err(|_| Violation::InvalidUtf8)?;
        let object = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => object,
            _ => return Err(Violation::MalformedJson),
        };

        match object.get("event").and_then(Value::as_str) {
            Some(DISCONNECT_EVENT) => {
                check_envelope_keys(&object)?;
                if object.contains_key("cid") {
                    return Err(Violation::InvalidCid);
                }
                conn.request_disconnect();
                Ok(Envelope::Disconnect)
            }
            Some(HANDSHAKE_EVENT) => {
                check_envelope_keys(&object)?;
                if conn.complete_handshake() {
                    Ok(Envelope::Handshake)
                } else {
                    Err(Violation::HandshakeReplay)
                }
            }
            _ => self.call(conn, object).map(Envelope::Call),
        }
    }

    fn heartbeat(&self, conn: &mut PeerConnection, now: Instant) -> Result<Envelope, Violation> {
        if let Some(last) = conn.last_heartbeat() {
            if now.saturating_duration_since(last) < self.heartbeat_min_interval {
                return Err(Violation::HeartbeatFlood);
            }
        }
        conn.record_heartbeat(now);
        Ok(Envelope::Heartbeat)
    }

    fn call(&self, conn: &PeerConnection, mut object: Map<String, Value>) -> Result<Call, Violation> {
        check_envelope_keys(&object)?;

        let event = match object.remove("event") {
            Some(Value::String(event)) => event,
            _ => return Err(Violation::InvalidEvent),
        };
        let data = match object.remove("data") {
            Some(Value::Object(data)) => data,
            _ => return Err(Violation::InvalidData),
        };
        let cid = match object.remove("cid") {
            None => None,
            Some(cid @ Value::Number(_)) => Some(cid),
            Some(_) => return Err(Violation::InvalidCid),
        };

        if !conn.handshake_completed() {
            return Err(Violation::HandshakeRequired);
        }

        let operation = Operation::parse(&event)?;
        if !self.handlers.contains(&event) {
            return Err(Violation::UnknownHandler(event));
        }

        if let Some(key) = data.keys().find(|k| !DATA_KEYS.contains(&k.as_str())) {
            return Err(Violation::UnexpectedDataKey(key.clone()));
        }
        if let Some(payload) = data.get("data") {
            self.schemas
                .validate(operation.version, operation.handler, payload)?;
        }
        if let Some(headers) = data.get("headers") {
            check_headers(headers)?;
        }

        Ok(Call { event, data, cid })
    }
}

fn check_envelope_keys(object: &Map<String, Value>) -> Result<(), Violation> {
    match object.keys().find(|k| !ENVELOPE_KEYS.contains(&k.as_str())) {
        Some(key) => Err(Violation::UnexpectedKey(key.clone())),
        None => Ok(()),
    }
}

/// Headers: flat object, only `version`/`Content-Type` (string) and
/// `port`/`height` (number), every key optional.
pub fn check_headers(headers: &Value) -> Result<(), Violation> {
    let headers = headers
        .as_object()
        .ok_or_else(|| Violation::Headers("headers must be an object".into()))?;

    for (key, value) in headers {
        let type_ok = match key.as_str() {
            "version" | "Content-Type" => value.is_string(),
            "port" | "height" => value.is_number(),
            other => return Err(Violation::Headers(format!("unexpected key {other}"))),
        };
        if !type_ok {
            return Err(Violation::Headers(format!("{key} has the wrong type")));
        }
    }
    Ok(())
}
