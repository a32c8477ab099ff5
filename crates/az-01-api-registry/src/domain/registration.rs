//! Registered APIs and their call statistics.

use crate::domain::schema::ParameterSchema;
use crate::middleware::Middleware;
use crate::ports::ApiHandler;
use parking_lot::Mutex;
use serde::Serialize;
use shared_types::{now, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// `Module.Operation`.
pub fn full_name(module: &str, operation: &str) -> String {
    format!("{module}.{operation}")
}

/// Options for `ApiRegistry::register`.
#[derive(Clone, Default)]
pub struct RegisterOptions {
    pub schema: ParameterSchema,
    /// Runs after the global middleware, in this order.
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub description: Option<String>,
    /// Replace an existing registration instead of failing.
    pub update: bool,
}

impl RegisterOptions {
    pub fn schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn update(mut self) -> Self {
        self.update = true;
        self
    }
}

/// Per-API counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiStats {
    pub call_count: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Rolling mean over successful calls.
    pub average_execution_ms: f64,
    pub last_called: Option<Timestamp>,
}

impl ApiStats {
    fn record_call(&mut self) {
        self.call_count += 1;
        self.last_called = Some(now());
    }

    /// `avg' = (avg * (n - 1) + elapsed) / n` with `n` successful calls.
    fn record_success(&mut self, elapsed: Duration) {
        self.successful_calls += 1;
        let n = self.successful_calls as f64;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.average_execution_ms = (self.average_execution_ms * (n - 1.0) + elapsed_ms) / n;
    }

    fn record_failure(&mut self) {
        self.failed_calls += 1;
    }
}

/// A registered module operation.
pub struct ApiRegistration {
    pub module: String,
    pub operation: String,
    pub full_name: String,
    pub description: Option<String>,
    pub schema: ParameterSchema,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub registered_at: Timestamp,
    handler: Arc<dyn ApiHandler>,
    stats: Mutex<ApiStats>,
}

impl ApiRegistration {
    pub fn new(
        module: &str,
        operation: &str,
        handler: Arc<dyn ApiHandler>,
        options: RegisterOptions,
    ) -> Self {
        Self {
            module: module.to_string(),
            operation: operation.to_string(),
            full_name: full_name(module, operation),
            description: options.description,
            schema: options.schema,
            middleware: options.middleware,
            registered_at: now(),
            handler,
            stats: Mutex::new(ApiStats::default()),
        }
    }

    pub fn handler(&self) -> Arc<dyn ApiHandler> {
        Arc::clone(&self.handler)
    }

    pub(crate) fn record_call(&self) {
        self.stats.lock().record_call();
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        self.stats.lock().record_success(elapsed);
    }

    pub(crate) fn record_failure(&self) {
        self.stats.lock().record_failure();
    }

    pub fn stats(&self) -> ApiStats {
        self.stats.lock().clone()
    }

    pub fn info(&self) -> ApiInfo {
        ApiInfo {
            name: self.full_name.clone(),
            module: self.module.clone(),
            operation: self.operation.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            middleware: self.middleware.iter().map(|m| m.name().to_string()).collect(),
            registered_at: self.registered_at,
            stats: self.stats(),
        }
    }
}

/// Snapshot of a registration.
#[derive(Debug, Clone, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub module: String,
    pub operation: String,
    pub description: Option<String>,
    pub schema: ParameterSchema,
    pub middleware: Vec<String>,
    pub registered_at: Timestamp,
    pub stats: ApiStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rolling_average() {
        let mut stats = ApiStats::default();
        stats.record_success(Duration::from_millis(10));
        stats.record_success(Duration::from_millis(20));
        stats.record_success(Duration::from_millis(30));
        assert_eq!(stats.successful_calls, 3);
        assert!((stats.average_execution_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_do_not_move_average() {
        let mut stats = ApiStats::default();
        stats.record_call();
        stats.record_success(Duration::from_millis(8));
        stats.record_call();
        stats.record_failure();
        assert_eq!(stats.call_count, 2);
        assert_eq!(stats.failed_calls, 1);
        assert!((stats.average_execution_ms - 8.0).abs() < 1e-9);
        assert!(stats.last_called.is_some());
    }

    proptest! {
        #[test]
        fn prop_rolling_average_is_the_mean(samples in proptest::collection::vec(0u64..10_000, 1..50)) {
            let mut stats = ApiStats::default();
            for ms in &samples {
                stats.record_success(Duration::from_millis(*ms));
            }
            let mean = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
            prop_assert!((stats.average_execution_ms - mean).abs() < 1e-6);
        }
    }
}
