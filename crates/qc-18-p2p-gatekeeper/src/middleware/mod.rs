//! Validation pipeline stages.
//!
//! Stage order: Admission → Envelope → Authorization → dispatch

pub mod admission;
pub mod authorization;
pub mod envelope;

pub use admission::{ConnectionRegistry, Registration};
pub use authorization::REMOTE_ADDRESS_HEADER;
pub use envelope::{Call, Envelope, EnvelopeValidator};

use crate::domain::error::CoordinatorError;
use std::future::Future;
use std::time::Duration;

/// Bound one coordinator consultation by `limit`
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    method: &'static str,
    call: F,
) -> Result<T, CoordinatorError>
where
    F: Future<Output = Result<T, CoordinatorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CoordinatorError::Timeout(method)),
    }
}
