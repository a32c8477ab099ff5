//! # API Registry Flows
//!
//! Invocation behaviour across registry, middleware, circuit breaker, and
//! the message bus: retry with exponential backoff, breaker transitions,
//! token-secured calls, and middleware publishing audit traffic.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use az_01_api_registry::{
        ApiError, ApiHandler, ApiRegistry, CallContext, CircuitBreakerConfig, CircuitState,
        InvokeOptions, Middleware, Next, ParamSpec, ParamType, ParameterSchema, Parameters,
        RegisterOptions, RegistryConfig, SecurityConfig, TokenScope,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use shared_bus::{BusConfig, BusMessage, MessageBus, PublishOptions};
    use shared_types::Payload;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    /// Fails `failures` times with `message`, then succeeds.
    fn flaky(failures: u32, message: &'static str, calls: Arc<AtomicU32>) -> impl ApiHandler {
        move |_: &CallContext| -> Result<Payload, ApiError> {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(ApiError::handler(message))
            } else {
                Ok(json!({ "attempt": n }))
            }
        }
    }

    /// Publishes one `Api.Called` message per call onto the bus.
    struct AuditMiddleware {
        bus: Arc<MessageBus>,
    }

    #[async_trait]
    impl Middleware for AuditMiddleware {
        fn name(&self) -> &str {
            "Audit"
        }

        async fn handle(&self, ctx: CallContext, next: Next) -> Result<Payload, ApiError> {
            let api = ctx.api_name();
            let result = next.run(ctx).await;
            let _ = self.bus.publish(
                "Audit",
                "Api.Called",
                json!({ "api": api, "success": result.is_ok() }),
                PublishOptions::from_module("ApiRegistry"),
            );
            result
        }
    }

    // =============================================================================
    // RETRY AND BACKOFF
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_third_attempt() {
        let registry = ApiRegistry::new(RegistryConfig::default()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "RemoteConnection",
                "Connect",
                flaky(2, "Connection reset by peer", Arc::clone(&calls)),
                RegisterOptions::default(),
            )
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = registry
            .invoke(
                "RemoteConnection",
                "Connect",
                Parameters::new(),
                InvokeOptions::default().retries(2),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({ "attempt": 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(3_000));

        let record = &registry.call_history(Some(1), Some("RemoteConnection.Connect"))[0];
        assert!(record.success);
        assert_eq!(record.attempts.len(), 3);
        let delays: Vec<u64> = record.attempts.iter().filter_map(|a| a.backoff_ms).collect();
        assert_eq!(delays, vec![1_000, 2_000]);
        assert!(record.attempts[..2].iter().all(|a| a.error.is_some()));
        assert!(record.attempts[2].error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_returns_last_error() {
        let registry = ApiRegistry::new(RegistryConfig::default()).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register(
                "ISOManager",
                "Download",
                flaky(10, "mirror busy", Arc::clone(&calls)),
                RegisterOptions::default(),
            )
            .unwrap();

        let err = registry
            .invoke("ISOManager", "Download", Parameters::new(), InvokeOptions::default().retries(1))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::handler("mirror busy"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!registry.call_history(Some(1), None)[0].success);
    }

    // =============================================================================
    // CIRCUIT BREAKER
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_transition() {
        let registry = ApiRegistry::new(RegistryConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout: Duration::from_secs(30),
                ..CircuitBreakerConfig::default()
            },
            ..RegistryConfig::default()
        })
        .unwrap();

        let healthy = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        let (h, c) = (Arc::clone(&healthy), Arc::clone(&calls));
        registry
            .register(
                "OpenTofuProvider",
                "Plan",
                move |_: &CallContext| -> Result<Payload, ApiError> {
                    c.fetch_add(1, Ordering::SeqCst);
                    if h.load(Ordering::SeqCst) {
                        Ok(json!({ "changes": 0 }))
                    } else {
                        Err(ApiError::handler("provider crashed"))
                    }
                },
                RegisterOptions::default(),
            )
            .unwrap();

        for _ in 0..3 {
            assert!(registry
                .invoke("OpenTofuProvider", "Plan", Parameters::new(), InvokeOptions::default())
                .await
                .is_err());
        }
        assert_eq!(registry.circuit_state("OpenTofuProvider", "Plan"), CircuitState::Open);

        // Open: fail fast without reaching the handler.
        for _ in 0..5 {
            let err = registry
                .invoke("OpenTofuProvider", "Plan", Parameters::new(), InvokeOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err, ApiError::CircuitOpen("OpenTofuProvider.Plan".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Cool-down, then one successful trial closes the circuit.
        healthy.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        registry
            .invoke("OpenTofuProvider", "Plan", Parameters::new(), InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.circuit_state("OpenTofuProvider", "Plan"), CircuitState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let summary = registry.circuit_summary();
        assert_eq!(summary.closed, 1);
        assert_eq!(summary.open, 0);
        assert_eq!(registry.metrics().circuit_rejections, 5);
    }

    #[tokio::test]
    async fn test_caller_errors_do_not_trip_the_breaker() {
        let registry = ApiRegistry::new(RegistryConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
            ..RegistryConfig::default()
        })
        .unwrap();
        registry
            .register(
                "LabRunner",
                "Start",
                |ctx: &CallContext| -> Result<Payload, ApiError> {
                    Ok(json!({ "lab": ctx.parameter("name").cloned() }))
                },
                RegisterOptions::default().schema(
                    ParameterSchema::new()
                        .param("name", ParamSpec::required(ParamType::String))
                        .param(
                            "mode",
                            ParamSpec::optional(ParamType::String)
                                .allowed([json!("quick"), json!("full")])
                                .default_value(json!("quick")),
                        ),
                ),
            )
            .unwrap();

        for _ in 0..3 {
            let err = registry
                .invoke("LabRunner", "Start", Parameters::new(), InvokeOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ApiError::ParameterValidation { .. }));
        }
        assert_eq!(registry.circuit_state("LabRunner", "Start"), CircuitState::Closed);

        let result = registry
            .invoke(
                "LabRunner",
                "Start",
                params(json!({ "name": "web" })),
                InvokeOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result["lab"], json!("web"));
        assert_eq!(registry.metrics().validation_failures, 3);
    }

    // =============================================================================
    // SECURITY AND MIDDLEWARE
    // =============================================================================

    #[tokio::test]
    async fn test_token_lifecycle_across_calls() {
        let registry = ApiRegistry::new(RegistryConfig::default()).unwrap();
        registry
            .register(
                "SecureCredentials",
                "Get",
                |ctx: &CallContext| -> Result<Payload, ApiError> {
                    let user = ctx
                        .authentication
                        .as_ref()
                        .map(|a| a.user.clone())
                        .unwrap_or_default();
                    Ok(json!({ "user": user }))
                },
                RegisterOptions::default(),
            )
            .unwrap();
        registry.enable_security(SecurityConfig::default());

        let security = Arc::clone(registry.security());
        let issued = security.issue_token("LabRunner", "alice", None, Vec::new());
        let other = security.issue_token("LabRunner", "bob", None, Vec::new());

        let result = registry
            .invoke(
                "SecureCredentials",
                "Get",
                Parameters::new(),
                InvokeOptions::default().token(issued.token.clone()),
            )
            .await
            .unwrap();
        assert_eq!(result["user"], json!("alice"));

        // Bulk revocation needs confirmation.
        let scope = TokenScope::Module("LabRunner".into());
        assert_eq!(
            security.revoke(&scope, false),
            Err(ApiError::ConfirmationRequired { count: 2 })
        );
        assert_eq!(security.revoke(&scope, true), Ok(2));

        let err = registry
            .invoke(
                "SecureCredentials",
                "Get",
                Parameters::new(),
                InvokeOptions::default().token(other.token),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert_eq!(registry.metrics().auth_failures, 1);
    }

    #[tokio::test]
    async fn test_middleware_publishes_to_bus() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        let audited = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&audited);
        bus.subscribe_fn("Audit", "Api.*", "SystemMonitoring", move |m: &BusMessage| {
            sink.lock().push(m.data.clone());
            Ok(())
        });

        let registry = ApiRegistry::new(RegistryConfig::default()).unwrap();
        assert!(registry.add_middleware(
            "Audit",
            500,
            Arc::new(AuditMiddleware {
                bus: Arc::clone(&bus),
            }),
        ));
        registry
            .register(
                "ScriptManager",
                "Run",
                |_: &CallContext| -> Result<Payload, ApiError> { Ok(json!("done")) },
                RegisterOptions::default(),
            )
            .unwrap();
        registry
            .invoke("ScriptManager", "Run", Parameters::new(), InvokeOptions::default())
            .await
            .unwrap();
        // Skipping middleware bypasses the audit.
        registry
            .invoke(
                "ScriptManager",
                "Run",
                Parameters::new(),
                InvokeOptions::default().skip_middleware(),
            )
            .await
            .unwrap();

        bus.flush().await;
        assert_eq!(
            *audited.lock(),
            vec![json!({ "api": "ScriptManager.Run", "success": true })]
        );
        let names: Vec<String> = registry
            .list_middleware()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert!(names.ends_with(&["Audit".to_string()]));
    }

    #[tokio::test]
    async fn test_async_invocation_can_be_aborted() {
        struct Forever;

        #[async_trait]
        impl ApiHandler for Forever {
            async fn call(&self, _: &CallContext) -> Result<Payload, ApiError> {
                std::future::pending::<()>().await;
                Ok(Value::Null)
            }
        }

        let registry = Arc::new(ApiRegistry::new(RegistryConfig::default()).unwrap());
        registry
            .register("SystemMonitoring", "Watch", Forever, RegisterOptions::default())
            .unwrap();

        let handle = registry.invoke_async(
            "SystemMonitoring",
            "Watch",
            Parameters::new(),
            InvokeOptions::default(),
        );
        assert_eq!(handle.api(), "SystemMonitoring.Watch");
        handle.abort();
        assert!(matches!(handle.await, Err(ApiError::Aborted(_))));
    }
}
