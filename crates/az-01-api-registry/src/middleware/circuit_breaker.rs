//! Per-operation circuit breakers.
//!
//! Stops calling an API that keeps failing, then probes it again after a
//! cool-down.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │                    trial failure                                    │
//! │                  ┌──────────────────────┐                           │
//! │                  ▼                      │                           │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │ failures │ (reject) │ cooldown │ (trial)  │       │
//! │      └──────────┘          └──────────┘          └──────────┘       │
//! │            ▲                                           │            │
//! │            └───────────────────────────────────────────┘            │
//! │                           trial success                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//!
//! - `failure_threshold`: consecutive failures that open the circuit (default: 5)
//! - `open_timeout`: cool-down before a trial call is allowed (default: 60s)
//! - `half_open_max_calls`: concurrent trial calls while half-open (default: 1)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::{now, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Calls fail fast without invoking the operation
    Open,
    /// Cool-down elapsed - a limited number of trial calls pass
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub open_timeout: Duration,
    /// Trial calls allowed at once while half-open
    pub half_open_max_calls: u32,
    /// Enable circuit breaking
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
            enabled: true,
        }
    }
}

struct OperationCircuit {
    state: CircuitState,
    failure_count: u32,
    total_calls: u64,
    successful_calls: u64,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Timestamp>,
    last_failure_at: Option<Instant>,
    last_success: Option<Timestamp>,
}

impl OperationCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            total_calls: 0,
            successful_calls: 0,
            half_open_in_flight: 0,
            opened_at: None,
            last_failure: None,
            last_failure_at: None,
            last_success: None,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_in_flight = 0;
    }

    fn status(&self, operation: &str) -> CircuitStatus {
        let success_rate = if self.total_calls == 0 {
            100.0
        } else {
            self.successful_calls as f64 * 100.0 / self.total_calls as f64
        };
        CircuitStatus {
            operation: operation.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            total_calls: self.total_calls,
            successful_calls: self.successful_calls,
            success_rate,
            last_failure: self.last_failure,
            last_success: self.last_success,
            time_since_last_failure_ms: self
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

/// Circuit breakers for every API, keyed by `Module.Operation`.
pub struct CircuitBreakerManager {
    circuits: RwLock<HashMap<String, OperationCircuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admit or reject a call. Every admitted or rejected call counts
    /// towards `total_calls`.
    pub fn should_allow(&self, operation: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(operation.to_string())
            .or_insert_with(OperationCircuit::new);
        circuit.total_calls += 1;

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.open_timeout => {
                        debug!(
                            operation,
                            remaining_ms = (self.config.open_timeout - elapsed).as_millis() as u64,
                            "Circuit breaker is open, rejecting call"
                        );
                        false
                    }
                    _ => {
                        info!(operation, "Circuit breaker half-open, allowing trial call");
                        circuit.state = CircuitState::HalfOpen;
                        circuit.half_open_in_flight = 1;
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight < self.config.half_open_max_calls {
                    circuit.half_open_in_flight += 1;
                    true
                } else {
                    debug!(operation, "Trial call already in flight, rejecting call");
                    false
                }
            }
        }
    }

    pub fn record_success(&self, operation: &str) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(operation.to_string())
            .or_insert_with(OperationCircuit::new);
        circuit.successful_calls += 1;
        circuit.failure_count = 0;
        circuit.last_success = Some(now());

        if circuit.state == CircuitState::HalfOpen {
            info!(operation, "Circuit breaker closing after successful trial");
            circuit.state = CircuitState::Closed;
            circuit.opened_at = None;
            circuit.half_open_in_flight = 0;
        }
    }

    pub fn record_failure(&self, operation: &str) {
        if !self.config.enabled {
            return;
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(operation.to_string())
            .or_insert_with(OperationCircuit::new);
        circuit.failure_count += 1;
        circuit.last_failure = Some(now());
        circuit.last_failure_at = Some(Instant::now());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= self.config.failure_threshold {
                    warn!(
                        operation,
                        failures = circuit.failure_count,
                        threshold = self.config.failure_threshold,
                        cooldown_secs = self.config.open_timeout.as_secs(),
                        "Circuit breaker opening due to failures"
                    );
                    circuit.open();
                }
            }
            CircuitState::HalfOpen => {
                warn!(operation, "Circuit breaker reopening after trial failure");
                circuit.open();
            }
            CircuitState::Open => {}
        }
    }

    /// An admitted call ended without a success or failure verdict (a caller
    /// error). Frees its trial slot when half-open.
    pub fn release(&self, operation: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(operation) {
            if circuit.state == CircuitState::HalfOpen {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
            }
        }
    }

    /// Admit a call and hand back the guard that settles it. A guard dropped
    /// without a verdict frees its trial slot, so a cancelled trial cannot
    /// leave the circuit half-open with no way forward.
    pub fn admit(&self, operation: &str) -> Option<CircuitAdmission<'_>> {
        self.should_allow(operation).then(|| CircuitAdmission {
            manager: self,
            operation: operation.to_string(),
            settled: false,
        })
    }

    pub fn state(&self, operation: &str) -> CircuitState {
        self.circuits
            .read()
            .get(operation)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Status of one operation, or of every known operation sorted by name.
    pub fn status(&self, operation: Option<&str>) -> Vec<CircuitStatus> {
        let circuits = self.circuits.read();
        match operation {
            Some(name) => circuits
                .get(name)
                .map(|c| c.status(name))
                .into_iter()
                .collect(),
            None => {
                let mut all: Vec<CircuitStatus> =
                    circuits.iter().map(|(name, c)| c.status(name)).collect();
                all.sort_by(|a, b| a.operation.cmp(&b.operation));
                all
            }
        }
    }

    /// Aggregate view over every circuit.
    pub fn summary(&self) -> CircuitSummary {
        let circuits = self.circuits.read();
        let mut summary = CircuitSummary::default();
        for circuit in circuits.values() {
            summary.operations += 1;
            summary.total_calls += circuit.total_calls;
            summary.successful_calls += circuit.successful_calls;
            match circuit.state {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => summary.open += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        summary
    }

    /// Force an operation back to Closed with zeroed counters.
    pub fn reset(&self, operation: &str) -> bool {
        let mut circuits = self.circuits.write();
        match circuits.get_mut(operation) {
            Some(circuit) => {
                info!(operation, "Circuit breaker manually reset");
                *circuit = OperationCircuit::new();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let mut circuits = self.circuits.write();
        for (operation, circuit) in circuits.iter_mut() {
            info!(operation = %operation, "Circuit breaker manually reset");
            *circuit = OperationCircuit::new();
        }
    }
}

/// An admitted call that has not reported its outcome yet.
#[must_use = "dropping an admission releases it without a verdict"]
pub struct CircuitAdmission<'a> {
    manager: &'a CircuitBreakerManager,
    operation: String,
    settled: bool,
}

impl CircuitAdmission<'_> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.manager.record_success(&self.operation);
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.manager.record_failure(&self.operation);
    }

    /// End the call without a verdict.
    pub fn release(self) {}
}

impl Drop for CircuitAdmission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(operation = %self.operation, "Admitted call ended without a verdict");
            self.manager.release(&self.operation);
        }
    }
}

/// Status of one operation's circuit.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub operation: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    /// Percentage of admitted calls that succeeded.
    pub success_rate: f64,
    pub last_failure: Option<Timestamp>,
    pub last_success: Option<Timestamp>,
    pub time_since_last_failure_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitSummary {
    pub operations: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
}
