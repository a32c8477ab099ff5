//! The process-lifetime communication context.
//!
//! `CommunicationHub` owns the message bus and the API registry. Callers get
//! them through the hub instead of reaching for globals; `close` drains the
//! bus and stops its processor.

use crate::config::HubConfig;
use crate::status::{
    CommunicationMetrics, CommunicationStatus, CommunicationTestReport, ProbeResult,
};
use az_01_api_registry::{
    ApiError, ApiRegistry, CallContext, ConfigError, InvokeOptions, Parameters, RegisterOptions,
    SecurityConfig,
};
use serde_json::json;
use shared_bus::{BusMessage, MessageBus, PublishOptions, UnsubscribeScope, DEFAULT_EVENT_CHANNEL};
use shared_types::{now, Payload, Timestamp};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Module name the hub registers its own APIs and subscriptions under.
pub const HUB_MODULE: &str = "Hub";

/// Channel for hub lifecycle traffic and the self-test probe.
pub const SYSTEM_CHANNEL: &str = "System";

const PROBE_MESSAGE_TYPE: &str = "Hub.Probe";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid registry configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct CommunicationHub {
    config: HubConfig,
    bus: MessageBus,
    registry: Arc<ApiRegistry>,
    started_at: Timestamp,
}

impl CommunicationHub {
    /// Build the bus and registry and start the bus processor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        let bus = MessageBus::new(config.bus.clone());
        let registry = Arc::new(ApiRegistry::new(config.registry.clone())?);

        bus.create_channel(SYSTEM_CHANNEL, Some("Hub lifecycle and diagnostics".to_string()));
        bus.create_channel(DEFAULT_EVENT_CHANNEL, Some("Default event channel".to_string()));

        registry.register(
            HUB_MODULE,
            "Ping",
            |ctx: &CallContext| -> Result<Payload, ApiError> {
                Ok(json!({
                    "pong": true,
                    "callId": ctx.call_id,
                    "timestamp": now(),
                }))
            },
            RegisterOptions::default().describe("Liveness probe for the API registry"),
        )?;

        if config.enable_security {
            registry.enable_security(config.security.clone());
        }

        info!(
            security = config.enable_security,
            max_queue_size = config.bus.max_queue_size,
            "Communication hub started"
        );
        Ok(Self {
            config,
            bus,
            registry,
            started_at: now(),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ApiRegistry> {
        &self.registry
    }

    pub fn enable_security(&self, config: SecurityConfig) {
        self.registry.enable_security(config);
    }

    pub fn disable_security(&self) -> bool {
        self.registry.disable_security()
    }

    pub fn status(&self) -> CommunicationStatus {
        let bus = self.bus.metrics();
        let uptime = now().signed_duration_since(self.started_at);
        CommunicationStatus {
            started_at: self.started_at,
            uptime_secs: u64::try_from(uptime.num_seconds()).unwrap_or(0),
            closed: self.bus.is_closed(),
            processor_running: bus.processor_running,
            queue_depth: bus.queue_depth,
            history_size: bus.history_size,
            subscription_count: bus.subscription_count,
            channels: self.bus.list_channels(),
            apis: self
                .registry
                .list_apis(None)
                .into_iter()
                .map(|api| api.name)
                .collect(),
            middleware: self.registry.list_middleware(),
            security_enabled: self.registry.is_security_enabled(),
            active_tokens: self.registry.security().token_count(),
            circuits: self.registry.circuit_summary(),
        }
    }

    pub fn metrics(&self) -> CommunicationMetrics {
        CommunicationMetrics {
            collected_at: now(),
            bus: self.bus.metrics(),
            api: self.registry.metrics(),
            circuits: self.registry.circuit_status(None),
        }
    }

    /// Round-trip a probe message through a temporary subscription, then
    /// call `Hub.Ping`.
    pub async fn test_communication(&self) -> CommunicationTestReport {
        let message_bus = self.probe_bus().await;
        let api_registry = self.probe_registry().await;
        let report = CommunicationTestReport::new(message_bus, api_registry);
        if report.success {
            info!(
                bus_ms = report.message_bus.latency_ms,
                api_ms = report.api_registry.latency_ms,
                "Communication self-test passed"
            );
        } else {
            warn!(
                bus = ?report.message_bus.error,
                api = ?report.api_registry.error,
                "Communication self-test failed"
            );
        }
        report
    }

    async fn probe_bus(&self) -> ProbeResult {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.bus.subscribe_fn(
            SYSTEM_CHANNEL,
            PROBE_MESSAGE_TYPE,
            HUB_MODULE,
            move |message: &BusMessage| {
                // Receiver gone means the probe already timed out.
                let _ = tx.send(message.id);
                Ok(())
            },
        );

        let published = self.bus.publish(
            SYSTEM_CHANNEL,
            PROBE_MESSAGE_TYPE,
            json!({ "sentAt": now() }),
            PublishOptions::from_module(HUB_MODULE),
        );
        let result = match published {
            Ok(id) => {
                let delivered = tokio::time::timeout(PROBE_TIMEOUT, async {
                    while let Some(received) = rx.recv().await {
                        if received == id {
                            return true;
                        }
                    }
                    false
                })
                .await;
                match delivered {
                    Ok(true) => ProbeResult::passed(elapsed_ms(started)),
                    Ok(false) => ProbeResult::failed(elapsed_ms(started), "probe handler dropped"),
                    Err(_) => ProbeResult::failed(
                        elapsed_ms(started),
                        format!("probe not delivered within {}s", PROBE_TIMEOUT.as_secs()),
                    ),
                }
            }
            Err(e) => ProbeResult::failed(elapsed_ms(started), e.to_string()),
        };

        if let Err(e) = self.bus.unsubscribe(UnsubscribeScope::Id(subscription)) {
            warn!(%subscription, error = %e, "Failed to remove probe subscription");
        }
        result
    }

    async fn probe_registry(&self) -> ProbeResult {
        let started = Instant::now();
        let options = InvokeOptions::default().timeout(PROBE_TIMEOUT).skip_security();
        match self
            .registry
            .invoke(HUB_MODULE, "Ping", Parameters::new(), options)
            .await
        {
            Ok(response) if response["pong"] == json!(true) => {
                ProbeResult::passed(elapsed_ms(started))
            }
            Ok(response) => {
                ProbeResult::failed(elapsed_ms(started), format!("unexpected response: {response}"))
            }
            Err(e) => ProbeResult::failed(elapsed_ms(started), e.to_string()),
        }
    }

    /// Reject new publishes, drain the queue, and stop the processor.
    pub async fn close(&self) {
        self.bus.close().await;
        let metrics = self.bus.metrics();
        info!(
            processed = metrics.messages_processed,
            undelivered = metrics.undelivered_messages,
            "Communication hub closed"
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
