//! Outbound ports for the API registry.

use crate::domain::context::CallContext;
use crate::domain::error::ApiError;
use async_trait::async_trait;
use shared_types::Payload;

/// The operation behind a registered API.
///
/// Synchronous closures `Fn(&CallContext) -> Result<Payload, ApiError>`
/// implement this directly.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    async fn call(&self, ctx: &CallContext) -> Result<Payload, ApiError>;
}

#[async_trait]
impl<F> ApiHandler for F
where
    F: Fn(&CallContext) -> Result<Payload, ApiError> + Send + Sync,
{
    async fn call(&self, ctx: &CallContext) -> Result<Payload, ApiError> {
        (self)(ctx)
    }
}
