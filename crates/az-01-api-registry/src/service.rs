//! API registry service - registration, invocation and the call pipeline.
//!
//! ```text
//! invoke(module, op, params)
//!   │
//!   ├─ lookup ───────────── NotFound
//!   ├─ schema validation ── ParameterValidation (all violations)
//!   │
//!   └─ attempt loop (retry_attempts + 1)
//!        ├─ circuit breaker ── CircuitOpen (never retried)
//!        ├─ spawn chain: global middleware → per-API middleware → handler
//!        ├─ hard timeout ───── task aborted, Timeout
//!        └─ retryable error?  sleep min(base * 2^(n-1), max), try again
//! ```
//!
//! Every call, successful or not, lands in the bounded call history.

use crate::config::{ConfigError, RegistryConfig};
use crate::domain::context::{CallContext, AUTHORIZATION_HEADER};
use crate::domain::error::ApiError;
use crate::domain::history::{AttemptRecord, CallHistory, CallRecord};
use crate::domain::registration::{full_name, ApiInfo, ApiRegistration, RegisterOptions};
use crate::domain::schema::Parameters;
use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::middleware::{
    AuthMiddleware, CircuitBreakerManager, CircuitState, CircuitStatus, CircuitSummary,
    LoggingMiddleware, Middleware, MiddlewareInfo, MiddlewarePipeline, Next, SecurityConfig,
    SecurityContext, LOGGING_MIDDLEWARE, LOGGING_PRIORITY, SECURITY_MIDDLEWARE,
    SECURITY_PRIORITY,
};
use crate::ports::ApiHandler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared_types::{now, Payload};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call options for [`ApiRegistry::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Hard timeout per attempt. Falls back to the registry default.
    pub timeout: Option<Duration>,
    /// Skip the global middleware. Per-API middleware still runs.
    pub skip_middleware: bool,
    /// Sent as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    pub headers: HashMap<String, String>,
    pub skip_security: bool,
    pub enable_circuit_breaker: bool,
    /// Extra attempts for retryable errors.
    pub retry_attempts: u32,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            skip_middleware: false,
            auth_token: None,
            headers: HashMap::new(),
            skip_security: false,
            enable_circuit_breaker: true,
            retry_attempts: 0,
        }
    }
}

impl InvokeOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn skip_middleware(mut self) -> Self {
        self.skip_middleware = true;
        self
    }

    pub fn skip_security(mut self) -> Self {
        self.skip_security = true;
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.enable_circuit_breaker = false;
        self
    }
}

/// Handle to a call started with [`ApiRegistry::invoke_async`].
///
/// Awaiting it yields the call's result. Dropping it does not cancel the
/// call; use [`ApiCallHandle::abort`] for that. An aborted call stops its
/// handler and gives back any circuit trial slot it held.
pub struct ApiCallHandle {
    call_id: Uuid,
    api: String,
    task: JoinHandle<Result<Payload, ApiError>>,
}

impl ApiCallHandle {
    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Future for ApiCallHandle {
    type Output = Result<Payload, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ApiError::Aborted("call cancelled".into())),
            Err(e) => Err(ApiError::Aborted(e.to_string())),
        })
    }
}

/// Registered module operations and the pipeline that invokes them.
pub struct ApiRegistry {
    config: RegistryConfig,
    apis: DashMap<String, Arc<ApiRegistration>>,
    pipeline: MiddlewarePipeline,
    breakers: CircuitBreakerManager,
    security: Arc<SecurityContext>,
    history: Mutex<CallHistory>,
    metrics: RegistryMetrics,
}

impl ApiRegistry {
    /// Create a registry. Installs the logging middleware unless disabled.
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Self {
            apis: DashMap::new(),
            pipeline: MiddlewarePipeline::new(),
            breakers: CircuitBreakerManager::new(config.circuit_breaker.clone()),
            security: Arc::new(SecurityContext::new(SecurityConfig::default())),
            history: Mutex::new(CallHistory::new(config.call_history_capacity)),
            metrics: RegistryMetrics::new(),
            config,
        };
        if registry.config.enable_logging_middleware {
            registry.pipeline.add(
                LOGGING_MIDDLEWARE,
                LOGGING_PRIORITY,
                Arc::new(LoggingMiddleware::new()),
            );
        }
        Ok(registry)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `module.operation`. Re-registering needs `options.update`.
    pub fn register(
        &self,
        module: &str,
        operation: &str,
        handler: impl ApiHandler + 'static,
        options: RegisterOptions,
    ) -> Result<ApiInfo, ApiError> {
        self.register_arc(module, operation, Arc::new(handler), options)
    }

    pub fn register_arc(
        &self,
        module: &str,
        operation: &str,
        handler: Arc<dyn ApiHandler>,
        options: RegisterOptions,
    ) -> Result<ApiInfo, ApiError> {
        for part in [module, operation] {
            if part.trim().is_empty() || part.contains(char::is_whitespace) {
                return Err(ApiError::InvalidName(full_name(module, operation)));
            }
        }

        let update = options.update;
        let registration = Arc::new(ApiRegistration::new(module, operation, handler, options));
        let info = registration.info();
        match self.apis.entry(registration.full_name.clone()) {
            Entry::Occupied(mut existing) if update => {
                existing.insert(registration);
                info!(api = %info.name, "API registration updated");
            }
            Entry::Occupied(_) => return Err(ApiError::AlreadyRegistered(info.name)),
            Entry::Vacant(slot) => {
                slot.insert(registration);
                info!(api = %info.name, "API registered");
            }
        }
        Ok(info)
    }

    pub fn unregister(&self, module: &str, operation: &str) -> Result<ApiInfo, ApiError> {
        let name = full_name(module, operation);
        let (_, registration) = self
            .apis
            .remove(&name)
            .ok_or_else(|| ApiError::NotFound(name.clone()))?;
        self.breakers.reset(&name);
        info!(api = %name, "API unregistered");
        Ok(registration.info())
    }

    pub fn get_api(&self, module: &str, operation: &str) -> Option<ApiInfo> {
        self.apis
            .get(&full_name(module, operation))
            .map(|r| r.value().info())
    }

    /// Registered APIs sorted by name, optionally for one module.
    pub fn list_apis(&self, module: Option<&str>) -> Vec<ApiInfo> {
        let mut apis: Vec<ApiInfo> = self
            .apis
            .iter()
            .filter(|r| module.map_or(true, |m| r.value().module == m))
            .map(|r| r.value().info())
            .collect();
        apis.sort_by(|a, b| a.name.cmp(&b.name));
        apis
    }

    pub fn api_count(&self) -> usize {
        self.apis.len()
    }

    // ------------------------------------------------------------------
    // Middleware
    // ------------------------------------------------------------------

    /// Add global middleware. Returns `true` if it replaced one of the same name.
    pub fn add_middleware(&self, name: &str, priority: i32, middleware: Arc<dyn Middleware>) -> bool {
        let replaced = self.pipeline.add(name, priority, middleware);
        info!(middleware = name, priority, replaced, "Middleware added");
        replaced
    }

    pub fn remove_middleware(&self, name: &str) -> bool {
        let removed = self.pipeline.remove(name);
        if removed {
            info!(middleware = name, "Middleware removed");
        }
        removed
    }

    pub fn list_middleware(&self) -> Vec<MiddlewareInfo> {
        self.pipeline.list()
    }

    // ------------------------------------------------------------------
    // Security
    // ------------------------------------------------------------------

    /// Apply `config` and install the security middleware ahead of all others.
    pub fn enable_security(&self, config: SecurityConfig) {
        info!(
            require_authentication = config.require_authentication,
            allowed_modules = config.allowed_modules.len(),
            "Security enabled"
        );
        self.security.set_config(config);
        self.pipeline.add(
            SECURITY_MIDDLEWARE,
            SECURITY_PRIORITY,
            Arc::new(AuthMiddleware::new(Arc::clone(&self.security))),
        );
    }

    pub fn disable_security(&self) -> bool {
        let removed = self.pipeline.remove(SECURITY_MIDDLEWARE);
        if removed {
            warn!("Security disabled");
        }
        removed
    }

    pub fn is_security_enabled(&self) -> bool {
        self.pipeline.contains(SECURITY_MIDDLEWARE)
    }

    pub fn security(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    // ------------------------------------------------------------------
    // Invocation
    // ------------------------------------------------------------------

    /// Invoke `module.operation` and wait for the result.
    pub async fn invoke(
        &self,
        module: &str,
        operation: &str,
        parameters: Parameters,
        options: InvokeOptions,
    ) -> Result<Payload, ApiError> {
        self.invoke_tracked(Uuid::new_v4(), module, operation, parameters, options, false)
            .await
    }

    /// Start the call on a background task and return a handle to it.
    pub fn invoke_async(
        self: &Arc<Self>,
        module: &str,
        operation: &str,
        parameters: Parameters,
        options: InvokeOptions,
    ) -> ApiCallHandle {
        let call_id = Uuid::new_v4();
        let api = full_name(module, operation);
        let registry = Arc::clone(self);
        let (module, operation) = (module.to_string(), operation.to_string());
        self.metrics.record_async();
        debug!(api = %api, %call_id, "Async API call started");

        let task = tokio::spawn(async move {
            registry
                .invoke_tracked(call_id, &module, &operation, parameters, options, true)
                .await
        });
        ApiCallHandle { call_id, api, task }
    }

    async fn invoke_tracked(
        &self,
        call_id: Uuid,
        module: &str,
        operation: &str,
        parameters: Parameters,
        options: InvokeOptions,
        is_async: bool,
    ) -> Result<Payload, ApiError> {
        let api = full_name(module, operation);
        let started_at = now();
        let started = Instant::now();
        let mut attempts = Vec::new();

        let result = self
            .execute(call_id, &api, module, operation, parameters, &options, &mut attempts)
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_call(result.is_ok(), duration_ms);
        if let Err(e) = &result {
            debug!(api = %api, %call_id, error = %e, attempts = attempts.len(), "API call failed");
        }
        self.history.lock().push(CallRecord {
            call_id,
            api,
            started_at,
            duration_ms,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
            attempts,
            is_async,
        });
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        call_id: Uuid,
        api: &str,
        module: &str,
        operation: &str,
        parameters: Parameters,
        options: &InvokeOptions,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<Payload, ApiError> {
        let registration = self
            .apis
            .get(api)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ApiError::NotFound(api.to_string()))?;

        let parameters = registration
            .schema
            .validate(api, parameters)
            .inspect_err(|_| self.metrics.record_validation_failure())?;

        let mut middleware = if options.skip_middleware {
            Vec::new()
        } else {
            self.pipeline.snapshot()
        };
        middleware.extend(registration.middleware.iter().cloned());
        let chain = Next::chain(middleware, registration.handler());

        let mut template = CallContext::new(module, operation, parameters);
        template.call_id = call_id;
        template.headers = options.headers.clone();
        if let Some(token) = &options.auth_token {
            template
                .headers
                .insert(AUTHORIZATION_HEADER.to_string(), format!("Bearer {token}"));
        }
        template.metadata.skip_security = options.skip_security;

        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let max_attempts = options.retry_attempts.saturating_add(1);
        let mut attempt = 1;

        loop {
            let mut ctx = template.clone();
            ctx.metadata.attempt = attempt;

            registration.record_call();
            let attempt_started = Instant::now();
            let result = self
                .run_attempt(api, chain.clone(), ctx, timeout, options.enable_circuit_breaker)
                .await;
            let elapsed = attempt_started.elapsed();

            let error = match result {
                Ok(payload) => {
                    registration.record_success(elapsed);
                    attempts.push(AttemptRecord {
                        attempt,
                        elapsed_ms: elapsed.as_millis() as u64,
                        error: None,
                        backoff_ms: None,
                    });
                    return Ok(payload);
                }
                Err(error) => error,
            };

            registration.record_failure();
            match &error {
                ApiError::Timeout { .. } => self.metrics.record_timeout(),
                ApiError::CircuitOpen(_) => self.metrics.record_circuit_rejection(),
                ApiError::Authentication(_) => self.metrics.record_auth_failure(),
                _ => {}
            }

            let backoff = (attempt < max_attempts && error.is_retryable())
                .then(|| self.config.backoff_delay(attempt));
            attempts.push(AttemptRecord {
                attempt,
                elapsed_ms: elapsed.as_millis() as u64,
                error: Some(error.to_string()),
                backoff_ms: backoff.map(|d| d.as_millis() as u64),
            });

            match backoff {
                Some(delay) => {
                    warn!(
                        api,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying API call"
                    );
                    self.metrics.record_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }

    /// One pass through the chain on its own task, under the hard timeout.
    ///
    /// Dropping this future aborts the chain task and releases the circuit
    /// admission without a verdict.
    async fn run_attempt(
        &self,
        api: &str,
        chain: Next,
        ctx: CallContext,
        timeout: Duration,
        guarded: bool,
    ) -> Result<Payload, ApiError> {
        let admission = if guarded {
            match self.breakers.admit(api) {
                Some(admission) => Some(admission),
                None => return Err(ApiError::CircuitOpen(api.to_string())),
            }
        } else {
            None
        };

        let mut attempt = JoinSet::new();
        attempt.spawn(chain.run(ctx));
        let joined = tokio::time::timeout(timeout, attempt.join_next()).await;
        let result = match joined {
            Ok(Some(Ok(result))) => result,
            Ok(Some(Err(e))) => Err(ApiError::Aborted(e.to_string())),
            Ok(None) => Err(ApiError::Aborted("attempt task missing".into())),
            Err(_) => {
                attempt.abort_all();
                Err(ApiError::Timeout {
                    api: api.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };

        if let Some(admission) = admission {
            match &result {
                Ok(_) => admission.succeeded(),
                Err(e) if e.counts_against_circuit() => admission.failed(),
                Err(_) => admission.release(),
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn call_history(&self, limit: Option<usize>, api: Option<&str>) -> Vec<CallRecord> {
        self.history.lock().query(limit, api)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn circuit_state(&self, module: &str, operation: &str) -> CircuitState {
        self.breakers.state(&full_name(module, operation))
    }

    pub fn circuit_status(&self, api: Option<&str>) -> Vec<CircuitStatus> {
        self.breakers.status(api)
    }

    pub fn circuit_summary(&self) -> CircuitSummary {
        self.breakers.summary()
    }

    /// Force a circuit back to Closed. Returns `false` if it was never used.
    pub fn reset_circuit(&self, api: &str) -> bool {
        let reset = self.breakers.reset(api);
        if reset {
            info!(api, "Circuit breaker reset");
        }
        reset
    }

    pub fn reset_all_circuits(&self) {
        self.breakers.reset_all();
    }
}
