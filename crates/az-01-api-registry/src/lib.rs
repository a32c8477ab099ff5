//! # AZ-01 API Registry
//!
//! Module operations exposed as `Module.Operation` APIs and invoked through
//! a middleware pipeline.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        API REGISTRY (az-01)                     │
//! ├────────────────────────────────────────────────────────────────┤
//! │  invoke ─► schema ─► circuit breaker ─► timeout ─► retry loop  │
//! │                                 │                               │
//! │                ┌────────────────┴────────────────┐              │
//! │                │        Middleware chain          │              │
//! │                │  Security(0) → Logging(100) →    │              │
//! │                │  ...global → ...per-API          │              │
//! │                └────────────────┬────────────────┘              │
//! │                                 ▼                               │
//! │                           ApiHandler                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure classification
//!
//! | Error | Retried | Trips breaker |
//! |-------|---------|---------------|
//! | `Timeout` | yes | yes |
//! | `Handler` (timeout/connection/network/unavailable/busy) | yes | yes |
//! | `Handler` (other) | no | yes |
//! | `Authentication`, `ParameterValidation`, `NotFound` | no | no |
//! | `CircuitOpen` | no | no |
//!
//! ## Usage
//!
//! ```ignore
//! use az_01_api_registry::{ApiRegistry, InvokeOptions, RegisterOptions, RegistryConfig};
//!
//! let registry = ApiRegistry::new(RegistryConfig::default())?;
//! registry.register("Lab", "Start", |ctx: &CallContext| Ok(json!("started")), RegisterOptions::default())?;
//! let result = registry.invoke("Lab", "Start", params, InvokeOptions::default().retries(2)).await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod domain;
pub mod metrics;
pub mod middleware;
pub mod ports;
pub mod service;

// Re-exports
pub use config::{ConfigError, RegistryConfig};
pub use domain::{
    full_name, ApiError, ApiInfo, ApiResult, ApiStats, AttemptRecord, Authentication,
    CallContext, CallMetadata, CallRecord, ParamSpec, ParamType, ParameterSchema, Parameters,
    RegisterOptions, AUTHORIZATION_HEADER,
};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use middleware::{
    AuthMiddleware, CircuitBreakerConfig, CircuitState, CircuitStatus, CircuitSummary,
    IssuedToken, LoggingMiddleware, Middleware, MiddlewareInfo, Next, SecurityConfig,
    SecurityContext, TokenInfo, TokenScope, API_CALL_SCOPE, LOGGING_MIDDLEWARE,
    LOGGING_PRIORITY, SECURITY_MIDDLEWARE, SECURITY_PRIORITY,
};
pub use ports::ApiHandler;
pub use service::{ApiCallHandle, ApiRegistry, InvokeOptions};
