//! Per-connection state.
//!
//! Lifecycle:
//!
//! ```text
//! CONNECTING ──admission──→ HANDSHAKING ──#handshake──→ ESTABLISHED
//!      │                         │                           │
//!      └─────────────────────────┴───────────────────────────┴──→ TERMINATED
//! ```
//!
//! `TERMINATED` is final.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Established,
    Terminated,
}

/// A remote peer connection, owned by the task serving it
#[derive(Debug, Clone)]
pub struct PeerConnection {
    id: ConnectionId,
    remote: SocketAddr,
    state: ConnectionState,
    disconnect_requested: bool,
    last_heartbeat: Option<Instant>,
}

impl PeerConnection {
    pub fn new(id: ConnectionId, remote: SocketAddr) -> Self {
        Self {
            id,
            remote,
            state: ConnectionState::Connecting,
            disconnect_requested: false,
            last_heartbeat: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Remote IP with IPv4-mapped IPv6 folded to IPv4
    pub fn ip(&self) -> IpAddr {
        self.remote.ip().to_canonical()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handshake_completed(&self) -> bool {
        self.state == ConnectionState::Established
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConnectionState::Terminated
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }

    /// CONNECTING → HANDSHAKING
    pub fn admit(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Handshaking;
        }
    }

    /// HANDSHAKING → ESTABLISHED. Returns false if the handshake was already seen.
    pub fn complete_handshake(&mut self) -> bool {
        if self.state == ConnectionState::Handshaking {
            self.state = ConnectionState::Established;
            true
        } else {
            false
        }
    }

    pub fn request_disconnect(&mut self) {
        self.disconnect_requested = true;
    }

    pub fn record_heartbeat(&mut self, at: Instant) {
        self.last_heartbeat = Some(at);
    }

    pub fn terminate(&mut self) {
        self.state = ConnectionState::Terminated;
    }
}
