//! # Shared Bus - In-Process Publish/Subscribe
//!
//! The message bus every AitherZero module communicates through.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Module A    │                    │  Module B    │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │ Message Bus  │          │
//!                  │  (channels)  │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! ## Guarantees
//!
//! - Messages are dequeued in FIFO order by a single processor task.
//! - Expired messages are dropped without reaching any handler.
//! - A failing or panicking handler or filter is recorded on its
//!   subscription and never affects the publisher or other handlers.
//! - A slow handler delays only its own subscription's deliveries.
//! - Publishing never blocks: a full queue rejects with `QueueFull`.
//!
//! Single process only. Messages are not persisted across restarts and
//! delivery is at most once.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod message;
pub mod pattern;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use channel::{ChannelInfo, ChannelStatistics};
pub use config::BusConfig;
pub use error::{BusError, HandlerError};
pub use events::{
    BusEvent, EventHistory, EventOptions, EventQuery, HistoryClearFilter, DEFAULT_EVENT_CHANNEL,
    EVENT_TYPE_PREFIX,
};
pub use export::{parse_json_export, ExportFormat, ExportOptions, ExportedEvent};
pub use message::{BusMessage, DeliveryReport, PublishOptions};
pub use pattern::TypePattern;
pub use publisher::{BusMetrics, MessageBus, QueueFilter};
pub use subscriber::{
    HandlerFailure, MessageHandler, SubscribeOptions, SubscriptionInfo, SubscriptionQuery,
    UnsubscribeScope,
};

/// Queue depth at which publishing fails.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Persisted events kept before the oldest is evicted.
pub const DEFAULT_MAX_EVENT_HISTORY: usize = 1_000;

/// Message TTL when the publisher supplies none.
pub const DEFAULT_TTL_SECS: u64 = 300;
