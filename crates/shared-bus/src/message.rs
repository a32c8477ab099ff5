//! # Bus Messages
//!
//! A message is created by a publisher, dequeued once by the processor,
//! delivered to every matching subscription, then discarded.

use serde::{Deserialize, Serialize};
use shared_types::{now, Payload, Priority, Timestamp};
use std::time::Duration;
use uuid::Uuid;

const MAX_TTL_DAYS: i64 = 36_500;

/// A message travelling through the bus.
///
/// Invariant: `expires_at == timestamp + ttl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub channel: String,
    pub message_type: String,
    pub data: Payload,
    pub source_module: String,
    pub priority: Priority,
    pub timestamp: Timestamp,
    pub expires_at: Timestamp,
}

impl BusMessage {
    pub fn new(
        channel: impl Into<String>,
        message_type: impl Into<String>,
        data: Payload,
        source_module: impl Into<String>,
        priority: Priority,
        ttl: Duration,
    ) -> Self {
        let timestamp = now();
        // TTLs beyond chrono's range are clamped to a century.
        let ttl = chrono::Duration::from_std(ttl)
            .ok()
            .filter(|ttl| *ttl <= chrono::Duration::days(MAX_TTL_DAYS))
            .unwrap_or_else(|| chrono::Duration::days(MAX_TTL_DAYS));
        let expires_at = timestamp + ttl;
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            message_type: message_type.into(),
            data,
            source_module: source_module.into(),
            priority,
            timestamp,
            expires_at,
        }
    }

    /// Expired messages must never reach a handler.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        at > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now())
    }
}

/// Publisher-side options for a message.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub source_module: Option<String>,
    pub priority: Priority,
    /// Falls back to the bus default TTL.
    pub ttl: Option<Duration>,
}

impl PublishOptions {
    pub fn from_module(module: impl Into<String>) -> Self {
        Self {
            source_module: Some(module.into()),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Outcome of delivering one message to its matching subscriptions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    pub message_id: Uuid,
    /// Handlers that completed successfully.
    pub processed_count: u32,
    /// One entry per failed handler.
    pub errors: Vec<String>,
}
