//! # Channel Registry
//!
//! Named mailboxes with subscriber counts and delivery statistics. Channels
//! are created on first use (or explicitly) and are never removed
//! automatically.

use parking_lot::RwLock;
use serde::Serialize;
use shared_types::{now, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A named logical topic on the bus.
pub struct Channel {
    name: String,
    description: Option<String>,
    created_at: Timestamp,
    /// Messages currently queued for this channel.
    queued: AtomicU64,
    subscriptions: AtomicUsize,
    total_messages: AtomicU64,
    delivered_messages: AtomicU64,
    last_activity: RwLock<Timestamp>,
}

impl Channel {
    fn new(name: &str, description: Option<String>) -> Self {
        let created_at = now();
        Self {
            name: name.to_string(),
            description,
            created_at,
            queued: AtomicU64::new(0),
            subscriptions: AtomicUsize::new(0),
            total_messages: AtomicU64::new(0),
            delivered_messages: AtomicU64::new(0),
            last_activity: RwLock::new(created_at),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Relaxed)
    }

    pub(crate) fn record_enqueued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// A queued message left the queue (dequeued or cleared).
    pub(crate) fn record_dequeued(&self) {
        // Saturating: clear and dequeue can race on the same message count.
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub(crate) fn record_delivered(&self, deliveries: u64) {
        if deliveries == 0 {
            return;
        }
        self.delivered_messages
            .fetch_add(deliveries, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn add_subscriber(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub(crate) fn remove_subscriber(&self) {
        let _ = self
            .subscriptions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    fn touch(&self) {
        *self.last_activity.write() = now();
    }

    /// Point-in-time view of the channel.
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            message_count: self.queued.load(Ordering::Relaxed),
            subscription_count: self.subscriptions.load(Ordering::Relaxed),
            statistics: ChannelStatistics {
                total_messages: self.total_messages.load(Ordering::Relaxed),
                delivered_messages: self.delivered_messages.load(Ordering::Relaxed),
            },
            last_activity: *self.last_activity.read(),
        }
    }
}

/// Per-channel delivery statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatistics {
    /// Messages ever published to the channel.
    pub total_messages: u64,
    /// Successful handler deliveries.
    pub delivered_messages: u64,
}

/// Snapshot of a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub message_count: u64,
    pub subscription_count: usize,
    pub statistics: ChannelStatistics,
    pub last_activity: Timestamp,
}

/// All channels known to the bus.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a channel, or return the existing one untouched.
    ///
    /// The flag is `true` when the channel was created by this call.
    pub fn create(&self, name: &str, description: Option<String>) -> (Arc<Channel>, bool) {
        if let Some(existing) = self.channels.read().get(name) {
            return (Arc::clone(existing), false);
        }

        let mut channels = self.channels.write();
        // Another writer may have won between the read and write locks.
        if let Some(existing) = channels.get(name) {
            return (Arc::clone(existing), false);
        }
        let channel = Arc::new(Channel::new(name, description));
        channels.insert(name.to_string(), Arc::clone(&channel));
        debug!(channel = name, "Channel created");
        (channel, true)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<ChannelInfo> = self.channels.read().values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
