//! Operation names and the handler registry.
//!
//! Operations are addressed as `namespace.version.handler`, e.g.
//! `p2p.peer.getPeers`. The registry holds every fully-qualified name this
//! node serves; it is loaded once from the coordinator and never changes.

use crate::domain::error::Violation;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The only namespace served to remote peers
pub const NAMESPACE: &str = "p2p";

/// Peer handlers that accept blocks or transactions and need a recognized caller
pub const PRIVILEGED_PEER_HANDLERS: [&str; 2] = ["postBlock", "postTransactions"];

/// version → handler names, as returned by the coordinator's `getHandlers`
pub type HandlerCatalog = BTreeMap<String, BTreeSet<String>>;

/// Known API versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiVersion {
    /// Public peer-to-peer surface
    Peer,
    /// Forger-only surface
    Internal,
}

impl ApiVersion {
    pub fn parse(version: &str) -> Option<Self> {
        match version {
            "peer" => Some(ApiVersion::Peer),
            "internal" => Some(ApiVersion::Internal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::Peer => "peer",
            ApiVersion::Internal => "internal",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decomposed operation name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation<'a> {
    pub namespace: &'a str,
    pub version: &'a str,
    pub handler: &'a str,
}

impl<'a> Operation<'a> {
    /// Split `name` into exactly three non-empty dot-separated segments
    pub fn parse(name: &'a str) -> Result<Self, Violation> {
        let mut segments = name.split('.');
        match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(namespace), Some(version), Some(handler), None)
                if !namespace.is_empty() && !version.is_empty() && !handler.is_empty() =>
            {
                Ok(Self {
                    namespace,
                    version,
                    handler,
                })
            }
            _ => Err(Violation::MalformedOperation(name.to_string())),
        }
    }

    pub fn api_version(&self) -> Option<ApiVersion> {
        ApiVersion::parse(self.version)
    }

    /// Whether this is a peer handler that accepts blocks or transactions
    pub fn is_privileged_peer_call(&self) -> bool {
        self.api_version() == Some(ApiVersion::Peer)
            && PRIVILEGED_PEER_HANDLERS.contains(&self.handler)
    }
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.version, self.handler)
    }
}

/// Ordered set of served operation names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerRegistry {
    names: BTreeSet<String>,
}

impl HandlerRegistry {
    /// Build `p2p.<version>.<handler>` names from the coordinator catalog
    pub fn from_catalog(catalog: &HandlerCatalog) -> Self {
        let names = catalog
            .iter()
            .flat_map(|(version, handlers)| {
                handlers
                    .iter()
                    .map(move |handler| format!("{}.{}.{}", NAMESPACE, version, handler))
            })
            .collect();
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
