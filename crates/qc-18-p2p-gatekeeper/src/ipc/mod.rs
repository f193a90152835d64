//! Coordinator IPC.
//!
//! The gatekeeper never owns rate-limit, peer-registry or readiness state; it
//! asks the coordinator process through correlated request/response messages.

pub mod handler;
pub mod requests;
pub mod responses;

pub use handler::{channel, IpcCoordinator, IpcError, IpcReceiver, IpcSender, ResponseListener};
pub use requests::{CoordinatorRequest, IpcRequest};
pub use responses::{IpcResponse, ResponsePayload};
