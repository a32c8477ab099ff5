//! Middleware pipeline for API calls.
//!
//! Chain order: global middleware by ascending priority, then the API's own
//! middleware in registration order, then the handler.
//!
//! ```text
//! Security(0) → Logging(100) → ...global... → ...per-API... → Handler
//! ```
//!
//! Each middleware receives the context and a [`Next`] continuation. Calling
//! `next.run(ctx)` continues the chain; returning without calling it
//! short-circuits the call.

pub mod auth;
pub mod circuit_breaker;
pub mod tracing;

pub use auth::{
    AuthMiddleware, IssuedToken, SecurityConfig, SecurityContext, TokenInfo, TokenScope,
    API_CALL_SCOPE, SECURITY_MIDDLEWARE, SECURITY_PRIORITY,
};
pub use circuit_breaker::{
    CircuitAdmission, CircuitBreakerConfig, CircuitBreakerManager, CircuitState, CircuitStatus, CircuitSummary,
};
pub use self::tracing::{LoggingMiddleware, LOGGING_MIDDLEWARE, LOGGING_PRIORITY};

use crate::domain::context::CallContext;
use crate::domain::error::ApiError;
use crate::ports::ApiHandler;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use shared_types::Payload;
use std::sync::Arc;

/// An interceptor wrapped around API invocation.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, ctx: CallContext, next: Next) -> Result<Payload, ApiError>;
}

/// The rest of the chain after the current middleware.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: Arc<dyn ApiHandler>,
}

impl Next {
    /// Compose `chain` around `handler`.
    pub fn chain(chain: Vec<Arc<dyn Middleware>>, handler: Arc<dyn ApiHandler>) -> Self {
        Self {
            chain: chain.into(),
            index: 0,
            handler,
        }
    }

    /// Continue with the next middleware, or the handler at the end.
    pub async fn run(self, ctx: CallContext) -> Result<Payload, ApiError> {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                middleware.handle(ctx, next).await
            }
            None => self.handler.call(&ctx).await,
        }
    }

    /// Middleware left before the handler.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

/// A registered global middleware.
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub name: String,
    /// Lower runs earlier.
    pub priority: i32,
    pub middleware: Arc<dyn Middleware>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiddlewareInfo {
    pub name: String,
    pub priority: i32,
}

/// Global middleware ordered by priority. Equal priorities keep insertion
/// order.
#[derive(Default)]
pub struct MiddlewarePipeline {
    entries: RwLock<Vec<MiddlewareEntry>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by priority, replacing any entry with the same name.
    ///
    /// Returns `true` if an existing entry was replaced.
    pub fn add(&self, name: &str, priority: i32, middleware: Arc<dyn Middleware>) -> bool {
        let mut entries = self.entries.write();
        let replaced = match entries.iter().position(|e| e.name == name) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        };
        let at = entries.partition_point(|e| e.priority <= priority);
        entries.insert(
            at,
            MiddlewareEntry {
                name: name.to_string(),
                priority,
                middleware,
            },
        );
        replaced
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|e| e.name == name)
    }

    pub fn list(&self) -> Vec<MiddlewareInfo> {
        self.entries
            .read()
            .iter()
            .map(|e| MiddlewareInfo {
                name: e.name.clone(),
                priority: e.priority,
            })
            .collect()
    }

    /// Snapshot of the ordered middleware.
    pub fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries
            .read()
            .iter()
            .map(|e| Arc::clone(&e.middleware))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::Parameters;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, ctx: CallContext, next: Next) -> Result<Payload, ApiError> {
            self.log.lock().push(format!("{}:before", self.name));
            if self.short_circuit {
                return Err(ApiError::Authentication("denied".into()));
            }
            let result = next.run(ctx).await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, short_circuit: bool) -> Arc<dyn Middleware> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            short_circuit,
        })
    }

    fn handler(log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ApiHandler> {
        let log = Arc::clone(log);
        Arc::new(move |_: &CallContext| -> Result<Payload, ApiError> {
            log.lock().push("handler".into());
            Ok(json!("done"))
        })
    }

    #[test]
    fn test_pipeline_orders_by_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add("Logging", 100, recorder("Logging", &log, false));
        pipeline.add("Security", 0, recorder("Security", &log, false));
        pipeline.add("Audit", 100, recorder("Audit", &log, false));

        let names: Vec<String> = pipeline.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Security", "Logging", "Audit"]);

        assert!(pipeline.add("Logging", 5, recorder("Logging", &log, false)));
        let names: Vec<String> = pipeline.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Security", "Logging", "Audit"]);
        assert_eq!(pipeline.list()[1].priority, 5);

        assert!(pipeline.remove("Audit"));
        assert!(!pipeline.remove("Audit"));
        assert_eq!(pipeline.len(), 2);
    }

    #[tokio::test]
    async fn test_chain_wraps_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let next = Next::chain(
            vec![recorder("A", &log, false), recorder("B", &log, false)],
            handler(&log),
        );
        assert_eq!(next.remaining(), 2);

        let result = next
            .run(CallContext::new("M", "op", Parameters::new()))
            .await
            .unwrap();
        assert_eq!(result, json!("done"));
        assert_eq!(
            *log.lock(),
            vec!["A:before", "B:before", "handler", "B:after", "A:after"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let next = Next::chain(
            vec![recorder("Gate", &log, true), recorder("B", &log, false)],
            handler(&log),
        );
        let err = next
            .run(CallContext::new("M", "op", Parameters::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert_eq!(*log.lock(), vec!["Gate:before"]);
    }
}
