//! Serializable status, metrics, and self-test reports.

use az_01_api_registry::{CircuitStatus, CircuitSummary, MetricsSnapshot, MiddlewareInfo};
use serde::Serialize;
use shared_bus::{BusMetrics, ChannelInfo};
use shared_types::Timestamp;

/// Point-in-time view of the hub.
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationStatus {
    pub started_at: Timestamp,
    pub uptime_secs: u64,
    pub closed: bool,
    pub processor_running: bool,
    pub queue_depth: usize,
    pub history_size: usize,
    pub subscription_count: usize,
    pub channels: Vec<ChannelInfo>,
    /// Full names of registered APIs, sorted
    pub apis: Vec<String>,
    pub middleware: Vec<MiddlewareInfo>,
    pub security_enabled: bool,
    pub active_tokens: usize,
    pub circuits: CircuitSummary,
}

/// Counters from both halves of the hub.
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationMetrics {
    pub collected_at: Timestamp,
    pub bus: BusMetrics,
    pub api: MetricsSnapshot,
    pub circuits: Vec<CircuitStatus>,
}

/// Outcome of one self-test probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn passed(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms,
            error: None,
        }
    }

    pub fn failed(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// Result of [`CommunicationHub::test_communication`](crate::CommunicationHub::test_communication).
#[derive(Debug, Clone, Serialize)]
pub struct CommunicationTestReport {
    pub success: bool,
    pub message_bus: ProbeResult,
    pub api_registry: ProbeResult,
}

impl CommunicationTestReport {
    pub fn new(message_bus: ProbeResult, api_registry: ProbeResult) -> Self {
        Self {
            success: message_bus.success && api_registry.success,
            message_bus,
            api_registry,
        }
    }
}
