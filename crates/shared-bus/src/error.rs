//! # Bus Errors
//!
//! Failures surfaced to publishers and subscribers. Handler failures are
//! never surfaced here: they are recorded on the subscription instead.

use thiserror::Error;
use uuid::Uuid;

/// Errors from message bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The channel does not exist. Publish and subscribe recover from this
    /// by creating the channel.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// The channel still has subscribers and removal was not forced.
    #[error("Channel {channel} has {subscriptions} active subscriptions")]
    ChannelInUse { channel: String, subscriptions: usize },

    /// The queue is at capacity. Not retried by the bus.
    #[error("Message queue is full ({capacity} messages)")]
    QueueFull { capacity: usize },

    /// No subscription matched an unsubscribe request.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// The bus has been closed and accepts no new messages.
    #[error("Message bus closed")]
    Closed,

    /// An event could not be serialized into its message wrapper.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Serializing or writing an event history export failed.
    #[error("Export failed: {0}")]
    Export(String),
}

/// Error returned by a message handler.
///
/// Recorded in the owning subscription's error log; never propagated to the
/// publisher or to other handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_full_display() {
        let err = BusError::QueueFull { capacity: 10 };
        assert_eq!(err.to_string(), "Message queue is full (10 messages)");
    }

    #[test]
    fn test_handler_error_conversions() {
        let from_str: HandlerError = "boom".into();
        let from_string: HandlerError = String::from("boom").into();
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.to_string(), "boom");
    }
}
