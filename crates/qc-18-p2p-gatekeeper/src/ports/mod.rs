//! Ports for the gatekeeper (hexagonal architecture).

pub mod outbound;

pub use outbound::{Coordinator, LogLevel, SystemTimeSource, TimeSource};
