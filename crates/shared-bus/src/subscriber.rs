//! # Subscriptions
//!
//! The subscription table maps (channel, message type pattern) to handlers.
//! Entries are keyed by a generated id and removed explicitly by id,
//! channel, or owning module.

use crate::error::HandlerError;
use crate::message::BusMessage;
use crate::pattern::TypePattern;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared_types::{now, Timestamp};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Receives messages delivered to a subscription.
///
/// Closures `Fn(&BusMessage) -> Result<(), HandlerError>` implement this
/// directly; implement it by hand for handlers that need to await.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        (self)(message)
    }
}

/// Extra predicate evaluated after channel and type pattern match.
pub type MessageFilter = Arc<dyn Fn(&BusMessage) -> bool + Send + Sync>;

/// Optional subscription settings.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub filter: Option<MessageFilter>,
    /// Give every delivery its own task. Deliveries may then complete out
    /// of order; by default a subscription sees messages in dequeue order.
    pub run_async: bool,
}

impl SubscribeOptions {
    pub fn filter(mut self, filter: impl Fn(&BusMessage) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn run_async(mut self) -> Self {
        self.run_async = true;
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("filter", &self.filter.is_some())
            .field("run_async", &self.run_async)
            .finish()
    }
}

/// A recorded handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub message_id: Uuid,
    pub timestamp: Timestamp,
    pub error: String,
}

/// A registered interest in messages of a channel/type pattern.
pub struct Subscription {
    pub id: Uuid,
    pub channel: String,
    pub pattern: TypePattern,
    pub subscriber_module: String,
    pub run_async: bool,
    pub created_at: Timestamp,
    handler: Arc<dyn MessageHandler>,
    filter: Option<MessageFilter>,
    message_count: AtomicU64,
    last_message: RwLock<Option<Timestamp>>,
    errors: Mutex<VecDeque<HandlerFailure>>,
    error_capacity: usize,
}

impl Subscription {
    pub(crate) fn new(
        channel: &str,
        pattern: TypePattern,
        handler: Arc<dyn MessageHandler>,
        subscriber_module: &str,
        options: SubscribeOptions,
        error_capacity: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            pattern,
            subscriber_module: subscriber_module.to_string(),
            run_async: options.run_async,
            created_at: now(),
            handler,
            filter: options.filter,
            message_count: AtomicU64::new(0),
            last_message: RwLock::new(None),
            errors: Mutex::new(VecDeque::new()),
            error_capacity: error_capacity.max(1),
        }
    }

    /// Channel equality, type pattern, then the optional filter.
    ///
    /// A panicking filter is recorded in this subscription's error log and
    /// counts as no match.
    pub fn matches(&self, message: &BusMessage) -> bool {
        if self.channel != message.channel || !self.pattern.matches(&message.message_type) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| filter(message))) {
            Ok(keep) => keep,
            Err(payload) => {
                let error = panic_message("filter", payload.as_ref());
                warn!(
                    subscription = %self.id,
                    module = %self.subscriber_module,
                    %error,
                    "Subscription filter failed"
                );
                self.record_error(message.id, error);
                false
            }
        }
    }

    pub(crate) fn handler(&self) -> Arc<dyn MessageHandler> {
        Arc::clone(&self.handler)
    }

    pub(crate) fn record_delivery(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_message.write() = Some(now());
    }

    pub(crate) fn record_error(&self, message_id: Uuid, error: String) {
        let mut errors = self.errors.lock();
        if errors.len() >= self.error_capacity {
            errors.pop_front();
        }
        errors.push_back(HandlerFailure {
            message_id,
            timestamp: now(),
            error,
        });
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> Vec<HandlerFailure> {
        self.errors.lock().iter().cloned().collect()
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            channel: self.channel.clone(),
            message_type_pattern: self.pattern.as_str().to_string(),
            subscriber_module: self.subscriber_module.clone(),
            has_filter: self.filter.is_some(),
            run_async: self.run_async,
            created_at: self.created_at,
            message_count: self.message_count(),
            last_message: *self.last_message.read(),
            errors: self.errors(),
        }
    }
}

/// Snapshot of a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub channel: String,
    pub message_type_pattern: String,
    pub subscriber_module: String,
    pub has_filter: bool,
    pub run_async: bool,
    pub created_at: Timestamp,
    pub message_count: u64,
    pub last_message: Option<Timestamp>,
    pub errors: Vec<HandlerFailure>,
}

/// Which subscriptions an unsubscribe call removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeScope {
    Id(Uuid),
    Channel(String),
    Module(String),
}

/// Filter for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionQuery {
    pub channel: Option<String>,
    pub subscriber_module: Option<String>,
}

pub(crate) fn panic_message(what: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("{what} panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("{what} panicked: {s}")
    } else {
        format!("{what} panicked")
    }
}

/// Concurrent subscription table.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: RwLock<HashMap<Uuid, Arc<Subscription>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);
        self.entries
            .write()
            .insert(subscription.id, Arc::clone(&subscription));
        subscription
    }

    /// Remove every entry in scope, returning what was removed.
    pub(crate) fn remove(&self, scope: &UnsubscribeScope) -> Vec<Arc<Subscription>> {
        let mut entries = self.entries.write();
        match scope {
            UnsubscribeScope::Id(id) => entries.remove(id).into_iter().collect(),
            UnsubscribeScope::Channel(channel) => {
                drain_where(&mut entries, |s| &s.channel == channel)
            }
            UnsubscribeScope::Module(module) => {
                drain_where(&mut entries, |s| &s.subscriber_module == module)
            }
        }
    }

    /// Subscriptions that should receive `message`.
    pub fn matching(&self, message: &BusMessage) -> Vec<Arc<Subscription>> {
        self.entries
            .read()
            .values()
            .filter(|s| s.matches(message))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Subscription>> {
        self.entries.read().get(id).cloned()
    }

    pub fn query(&self, query: &SubscriptionQuery) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .entries
            .read()
            .values()
            .filter(|s| query.channel.as_ref().map_or(true, |c| &s.channel == c))
            .filter(|s| {
                query
                    .subscriber_module
                    .as_ref()
                    .map_or(true, |m| &s.subscriber_module == m)
            })
            .map(|s| s.info())
            .collect();
        infos.sort_by_key(|s| s.created_at);
        infos
    }

    pub fn count_for_channel(&self, channel: &str) -> usize {
        self.entries
            .read()
            .values()
            .filter(|s| s.channel == channel)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn drain_where(
    entries: &mut HashMap<Uuid, Arc<Subscription>>,
    pred: impl Fn(&Subscription) -> bool,
) -> Vec<Arc<Subscription>> {
    let ids: Vec<Uuid> = entries
        .values()
        .filter(|s| pred(s))
        .map(|s| s.id)
        .collect();
    ids.iter().filter_map(|id| entries.remove(id)).collect()
}
