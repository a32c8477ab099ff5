//! Call logging middleware.
//!
//! Wraps each API call in an `api_call` span and records its outcome.

use crate::domain::context::CallContext;
use crate::domain::error::ApiError;
use crate::middleware::{Middleware, Next};
use async_trait::async_trait;
use shared_types::Payload;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Name the logging middleware is registered under.
pub const LOGGING_MIDDLEWARE: &str = "Logging";

pub const LOGGING_PRIORITY: i32 = 100;

#[derive(Clone, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        LOGGING_MIDDLEWARE
    }

    async fn handle(&self, ctx: CallContext, next: Next) -> Result<Payload, ApiError> {
        let api = ctx.api_name();
        let span = info_span!(
            "api_call",
            api = %api,
            call_id = %ctx.call_id,
            attempt = ctx.metadata.attempt,
        );
        let started = Instant::now();

        async move {
            debug!(parameters = ctx.parameters.len(), "API call started");
            let result = next.run(ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => debug!(elapsed_ms, "API call succeeded"),
                Err(e) => warn!(elapsed_ms, error = %e, "API call failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::Parameters;
    use crate::ports::ApiHandler;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_passes_result_through() {
        let ok: Arc<dyn ApiHandler> =
            Arc::new(|_: &CallContext| -> Result<Payload, ApiError> { Ok(json!(42)) });
        let mw: Arc<dyn Middleware> = Arc::new(LoggingMiddleware::new());
        let result = Next::chain(vec![Arc::clone(&mw)], ok)
            .run(CallContext::new("M", "op", Parameters::new()))
            .await;
        assert_eq!(result, Ok(json!(42)));

        let failing: Arc<dyn ApiHandler> = Arc::new(|_: &CallContext| -> Result<Payload, ApiError> {
            Err(ApiError::handler("nope"))
        });
        let result = Next::chain(vec![mw], failing)
            .run(CallContext::new("M", "op", Parameters::new()))
            .await;
        assert_eq!(result, Err(ApiError::handler("nope")));
        assert_eq!(LoggingMiddleware.name(), LOGGING_MIDDLEWARE);
    }
}
