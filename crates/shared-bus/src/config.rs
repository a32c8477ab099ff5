//! Configuration for the message bus.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Message bus configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusConfig {
    /// Publishing at this queue depth fails with `QueueFull`.
    pub max_queue_size: usize,
    /// Persisted events kept in history before the oldest is evicted.
    pub max_event_history: usize,
    /// TTL applied when the publisher does not supply one.
    pub default_ttl: Duration,
    /// Handler invocations allowed to run at once across all subscriptions.
    pub dispatch_workers: usize,
    /// Entries kept in each subscription's error log.
    pub subscription_error_log: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: crate::DEFAULT_MAX_QUEUE_SIZE,
            max_event_history: crate::DEFAULT_MAX_EVENT_HISTORY,
            default_ttl: Duration::from_secs(crate::DEFAULT_TTL_SECS),
            dispatch_workers: 16,
            subscription_error_log: 100,
        }
    }
}
