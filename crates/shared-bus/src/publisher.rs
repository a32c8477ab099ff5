//! # Message Bus
//!
//! Publishers enqueue onto a single bounded FIFO queue. One background
//! processor task dequeues in order, drops expired or unmatched messages,
//! and fans each remaining message out to its matching subscriptions. The
//! processor never waits on a handler.
//!
//! ```text
//!  publish() ──▶ [ queue (FIFO, bounded) ] ──▶ processor ─┬─▶ lane (per subscription) ─▶ handler
//!                                                  │      └─▶ task (run_async)        ─▶ handler
//!                                                  └─ expired / unmatched: dropped
//! ```
//!
//! Each subscription drains its own lane, so it sees messages in dequeue
//! order and a slow handler only holds up its own lane. Handler invocations
//! share a pool of `dispatch_workers` permits.

use crate::channel::{ChannelInfo, ChannelRegistry};
use crate::config::BusConfig;
use crate::error::{BusError, HandlerError};
use crate::events::{BusEvent, EventHistory, EventOptions, EventQuery, HistoryClearFilter};
use crate::export::{export_events, export_to_file, ExportOptions};
use crate::message::{BusMessage, DeliveryReport, PublishOptions};
use crate::pattern::TypePattern;
use crate::subscriber::{
    panic_message, MessageHandler, SubscribeOptions, Subscription, SubscriptionInfo,
    SubscriptionQuery, SubscriptionTable, UnsubscribeScope,
};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shared_types::Payload;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source module recorded when a publisher does not name one.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Selects queued messages for `clear_queue`. Empty clears everything.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub channel: Option<String>,
    /// Glob over the message type.
    pub message_type: Option<String>,
}

/// Bus-wide counters and gauges.
#[derive(Debug, Clone, Serialize)]
pub struct BusMetrics {
    pub messages_published: u64,
    pub messages_processed: u64,
    /// Successful handler invocations.
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub expired_messages: u64,
    /// Dequeued messages with no matching subscription.
    pub undelivered_messages: u64,
    pub events_raised: u64,
    pub queue_depth: usize,
    pub history_size: usize,
    pub channel_count: usize,
    pub subscription_count: usize,
    pub processor_running: bool,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    processed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    expired: AtomicU64,
    undelivered: AtomicU64,
    events: AtomicU64,
}

type Lane = mpsc::UnboundedSender<Arc<Delivery>>;

/// One dequeued message on its way to every matching subscription.
struct Delivery {
    message: BusMessage,
    /// Subscriptions that have not finished with the message.
    remaining: AtomicUsize,
    report: Mutex<DeliveryReport>,
}

struct BusInner {
    config: BusConfig,
    channels: ChannelRegistry,
    subscriptions: SubscriptionTable,
    queue: Mutex<VecDeque<BusMessage>>,
    wake: Notify,
    history: RwLock<EventHistory>,
    dispatch: Semaphore,
    /// Ordered delivery lanes, keyed by subscription id.
    lanes: Mutex<HashMap<Uuid, Lane>>,
    /// Messages published but not yet fully handled.
    pending: AtomicUsize,
    /// Signalled whenever `pending` drops to zero.
    drained: Notify,
    closed: AtomicBool,
    processor_running: AtomicBool,
    counters: Counters,
}

/// The in-process publish/subscribe bus.
pub struct MessageBus {
    inner: Arc<BusInner>,
    processor: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl MessageBus {
    /// Create the bus and start its processor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BusConfig) -> Self {
        let dispatch_permits = config.dispatch_workers.clamp(1, Semaphore::MAX_PERMITS);
        let inner = Arc::new(BusInner {
            history: RwLock::new(EventHistory::new(config.max_event_history)),
            dispatch: Semaphore::new(dispatch_permits),
            config,
            channels: ChannelRegistry::new(),
            subscriptions: SubscriptionTable::new(),
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            lanes: Mutex::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
            processor_running: AtomicBool::new(true),
            counters: Counters::default(),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_processor(Arc::clone(&inner), shutdown_rx));
        info!(
            max_queue_size = inner.config.max_queue_size,
            dispatch_workers = dispatch_permits,
            "Message bus started"
        );

        Self {
            inner,
            processor: Mutex::new(Some(handle)),
            shutdown,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // -------------------------------------------------------------------------
    // Channels
    // -------------------------------------------------------------------------

    /// Create a channel. Returns the existing channel unchanged if present.
    pub fn create_channel(&self, name: &str, description: Option<String>) -> ChannelInfo {
        let (channel, created) = self.inner.channels.create(name, description);
        if created {
            info!(channel = %name, "Channel registered");
        }
        channel.info()
    }

    pub fn channel(&self, name: &str) -> Option<ChannelInfo> {
        self.inner.channels.get(name).map(|c| c.info())
    }

    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.inner.channels.list()
    }

    /// Remove a channel with its subscriptions and queued messages.
    pub fn remove_channel(&self, name: &str, force: bool) -> Result<ChannelInfo, BusError> {
        let channel = self
            .inner
            .channels
            .get(name)
            .ok_or_else(|| BusError::ChannelNotFound(name.to_string()))?;

        let subscriptions = self.inner.subscriptions.count_for_channel(name);
        if subscriptions > 0 && !force {
            return Err(BusError::ChannelInUse {
                channel: name.to_string(),
                subscriptions,
            });
        }

        let removed = self
            .inner
            .subscriptions
            .remove(&UnsubscribeScope::Channel(name.to_string()));
        self.inner.close_lanes(&removed);
        let dropped = self.clear_queue(&QueueFilter {
            channel: Some(name.to_string()),
            message_type: None,
        });
        self.inner.channels.remove(name);

        info!(channel = %name, subscriptions, dropped, "Channel removed");
        Ok(channel.info())
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Enqueue a message. Never blocks; fails with `QueueFull` at capacity.
    pub fn publish(
        &self,
        channel: &str,
        message_type: &str,
        data: Payload,
        options: PublishOptions,
    ) -> Result<Uuid, BusError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let (channel_ref, created) = inner.channels.create(channel, None);
        if created {
            warn!(channel = %channel, "Channel did not exist, created on publish");
        }

        let priority = options.priority;
        let message = BusMessage::new(
            channel,
            message_type,
            data,
            options
                .source_module
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            priority,
            options.ttl.unwrap_or(inner.config.default_ttl),
        );
        let id = message.id;

        {
            let mut queue = inner.queue.lock();
            // `close` flips the flag under this lock; nothing lands behind
            // the processor's final drain.
            if inner.closed.load(Ordering::Acquire) {
                return Err(BusError::Closed);
            }
            if queue.len() >= inner.config.max_queue_size {
                warn!(channel = %channel, message_type, "Message queue full, publish rejected");
                return Err(BusError::QueueFull {
                    capacity: inner.config.max_queue_size,
                });
            }
            channel_ref.record_enqueued();
            inner.pending.fetch_add(1, Ordering::AcqRel);
            queue.push_back(message);
        }
        inner.counters.published.fetch_add(1, Ordering::Relaxed);
        inner.wake.notify_one();

        debug!(%id, channel = %channel, message_type, %priority, "Message published");
        Ok(id)
    }

    /// Raise an event: persist it (unless transient) and publish its
    /// `Event:<name>` wrapper on the target channel, or on every channel
    /// when broadcasting.
    pub fn publish_event(
        &self,
        name: &str,
        data: Payload,
        options: EventOptions,
    ) -> Result<Uuid, BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let event = BusEvent::new(name, data, options.channel.as_str(), options.source.clone());
        let payload =
            serde_json::to_value(&event).map_err(|e| BusError::Serialization(e.to_string()))?;
        let message_type = event.message_type();
        let id = event.id;

        if options.persist {
            let evicted = self.inner.history.write().push(event);
            if evicted > 0 {
                debug!(evicted, "Event history at capacity, oldest evicted");
            }
        }
        self.inner.counters.events.fetch_add(1, Ordering::Relaxed);

        let targets = if options.broadcast {
            self.inner.channels.create(&options.channel, None);
            self.inner.channels.names()
        } else {
            vec![options.channel.clone()]
        };

        let publish_options = PublishOptions {
            source_module: Some(options.source.module.clone()),
            priority: options.priority,
            ttl: None,
        };
        for channel in &targets {
            self.publish(channel, &message_type, payload.clone(), publish_options.clone())?;
        }

        debug!(%id, event = %name, channels = targets.len(), "Event raised");
        Ok(id)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Remove queued messages matching `filter`, keeping the rest in order.
    pub fn clear_queue(&self, filter: &QueueFilter) -> usize {
        let pattern = filter.message_type.as_deref().map(TypePattern::compile);
        let mut removed: Vec<String> = Vec::new();
        {
            let mut queue = self.inner.queue.lock();
            queue.retain(|m| {
                let selected = filter.channel.as_ref().map_or(true, |c| &m.channel == c)
                    && pattern.as_ref().map_or(true, |p| p.matches(&m.message_type));
                if selected {
                    removed.push(m.channel.clone());
                }
                !selected
            });
        }

        for channel in &removed {
            if let Some(c) = self.inner.channels.get(channel) {
                c.record_dequeued();
            }
        }
        self.inner.finish(removed.len());
        if !removed.is_empty() {
            info!(removed = removed.len(), "Message queue cleared");
        }
        removed.len()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register a handler for messages on `channel` whose type matches
    /// `pattern`. The channel is created if missing.
    pub fn subscribe(
        &self,
        channel: &str,
        pattern: &str,
        handler: impl MessageHandler + 'static,
        subscriber_module: &str,
        options: SubscribeOptions,
    ) -> Uuid {
        let (channel_ref, created) = self.inner.channels.create(channel, None);
        if created {
            debug!(channel = %channel, "Channel created on subscribe");
        }

        let subscription = Subscription::new(
            channel,
            TypePattern::compile(pattern),
            Arc::new(handler),
            subscriber_module,
            options,
            self.inner.config.subscription_error_log,
        );
        let id = self.inner.subscriptions.insert(subscription).id;
        channel_ref.add_subscriber();

        info!(%id, channel = %channel, pattern, module = %subscriber_module, "Subscribed");
        id
    }

    /// `subscribe` for plain closures.
    pub fn subscribe_fn<F>(
        &self,
        channel: &str,
        pattern: &str,
        subscriber_module: &str,
        handler: F,
    ) -> Uuid
    where
        F: Fn(&BusMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(
            channel,
            pattern,
            handler,
            subscriber_module,
            SubscribeOptions::default(),
        )
    }

    /// Remove subscriptions by id, channel or module.
    ///
    /// Removing by id fails when the id is unknown; the bulk scopes return
    /// how many were removed, possibly zero.
    pub fn unsubscribe(&self, scope: UnsubscribeScope) -> Result<usize, BusError> {
        let removed = self.inner.subscriptions.remove(&scope);
        if removed.is_empty() {
            if let UnsubscribeScope::Id(id) = scope {
                return Err(BusError::SubscriptionNotFound(id));
            }
        }
        self.inner.close_lanes(&removed);
        for subscription in &removed {
            if let Some(channel) = self.inner.channels.get(&subscription.channel) {
                channel.remove_subscriber();
            }
        }
        info!(?scope, removed = removed.len(), "Unsubscribed");
        Ok(removed.len())
    }

    pub fn subscription(&self, id: &Uuid) -> Option<SubscriptionInfo> {
        self.inner.subscriptions.get(id).map(|s| s.info())
    }

    pub fn list_subscriptions(&self, query: &SubscriptionQuery) -> Vec<SubscriptionInfo> {
        self.inner.subscriptions.query(query)
    }

    // -------------------------------------------------------------------------
    // Event history
    // -------------------------------------------------------------------------

    pub fn events(&self, query: &EventQuery) -> Vec<BusEvent> {
        self.inner.history.read().query(query)
    }

    pub fn clear_history(&self, filter: &HistoryClearFilter) -> usize {
        let removed = self.inner.history.write().clear(filter);
        info!(removed, "Event history cleared");
        removed
    }

    pub fn export_history(
        &self,
        query: &EventQuery,
        options: &ExportOptions,
    ) -> Result<String, BusError> {
        export_events(&self.events(query), options)
    }

    pub fn export_history_to_file(
        &self,
        path: &Path,
        query: &EventQuery,
        options: &ExportOptions,
    ) -> Result<usize, BusError> {
        let written = export_to_file(path, &self.events(query), options)?;
        info!(path = %path.display(), written, format = ?options.format, "Event history exported");
        Ok(written)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn metrics(&self) -> BusMetrics {
        let inner = &self.inner;
        let c = &inner.counters;
        BusMetrics {
            messages_published: c.published.load(Ordering::Relaxed),
            messages_processed: c.processed.load(Ordering::Relaxed),
            deliveries: c.delivered.load(Ordering::Relaxed),
            delivery_failures: c.failed.load(Ordering::Relaxed),
            expired_messages: c.expired.load(Ordering::Relaxed),
            undelivered_messages: c.undelivered.load(Ordering::Relaxed),
            events_raised: c.events.load(Ordering::Relaxed),
            queue_depth: self.queue_len(),
            history_size: inner.history.read().len(),
            channel_count: inner.channels.len(),
            subscription_count: inner.subscriptions.len(),
            processor_running: inner.processor_running.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until every published message has been dropped or delivered.
    pub async fn flush(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Stop accepting messages, drain the queue through the processor, and
    /// wait for in-flight deliveries.
    pub async fn close(&self) {
        {
            let _queue = self.inner.queue.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        let queued = self.queue_len();
        info!(queued, "Closing message bus");

        let _ = self.shutdown.send(true);
        self.inner.wake.notify_one();

        let handle = self.processor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Message processor ended abnormally");
                let dropped = self.clear_queue(&QueueFilter::default());
                if dropped > 0 {
                    warn!(dropped, "Queued messages dropped without a processor");
                }
            }
        }

        self.flush().await;
        self.inner.lanes.lock().clear();
        info!("Message bus closed");
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);
        // Lane workers hold the inner state; dropping their senders ends them.
        self.inner.lanes.lock().clear();
    }
}

/// Clears `processor_running` however the processor exits.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_processor(inner: Arc<BusInner>, mut shutdown: watch::Receiver<bool>) {
    let _running = RunningFlag(&inner.processor_running);
    debug!("Message processor running");
    loop {
        // Read before popping: once shutdown is visible, so is every
        // message accepted before it.
        let stopping = *shutdown.borrow();
        let next = inner.queue.lock().pop_front();
        match next {
            Some(message) => inner.route(message),
            None if stopping => break,
            None => {
                tokio::select! {
                    _ = inner.wake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("Message processor stopped");
}

/// Deliver a lane's messages one at a time, in the order they arrived.
async fn run_lane(
    inner: Arc<BusInner>,
    subscription: Arc<Subscription>,
    mut deliveries: mpsc::UnboundedReceiver<Arc<Delivery>>,
) {
    while let Some(delivery) = deliveries.recv().await {
        inner.deliver(&subscription, &delivery).await;
    }
}

impl BusInner {
    /// Drop or fan out one dequeued message. Never waits on a handler.
    fn route(self: &Arc<Self>, message: BusMessage) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(channel) = self.channels.get(&message.channel) {
            channel.record_dequeued();
        }

        if message.is_expired() {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            debug!(id = %message.id, channel = %message.channel, "Expired message dropped");
            self.finish(1);
            return;
        }

        let targets = self.subscriptions.matching(&message);
        if targets.is_empty() {
            self.counters.undelivered.fetch_add(1, Ordering::Relaxed);
            debug!(
                id = %message.id,
                channel = %message.channel,
                message_type = %message.message_type,
                "No matching subscription, message dropped"
            );
            self.finish(1);
            return;
        }

        let delivery = Arc::new(Delivery {
            remaining: AtomicUsize::new(targets.len()),
            report: Mutex::new(DeliveryReport {
                message_id: message.id,
                ..DeliveryReport::default()
            }),
            message,
        });
        for subscription in targets {
            if subscription.run_async {
                let inner = Arc::clone(self);
                let delivery = Arc::clone(&delivery);
                tokio::spawn(async move { inner.deliver(&subscription, &delivery).await });
            } else {
                self.enqueue_on_lane(subscription, Arc::clone(&delivery));
            }
        }
    }

    /// Queue `delivery` on the subscription's lane, starting the lane on
    /// first use.
    fn enqueue_on_lane(self: &Arc<Self>, subscription: Arc<Subscription>, delivery: Arc<Delivery>) {
        let mut lanes = self.lanes.lock();
        // Unsubscribed since matching: no lane may outlive its subscription.
        if self.subscriptions.get(&subscription.id).is_none() {
            drop(lanes);
            self.release(&delivery);
            return;
        }
        let lane = lanes.entry(subscription.id).or_insert_with(|| {
            let (lane, deliveries) = mpsc::unbounded_channel();
            tokio::spawn(run_lane(Arc::clone(self), Arc::clone(&subscription), deliveries));
            lane
        });
        if let Err(mpsc::error::SendError(delivery)) = lane.send(delivery) {
            lanes.remove(&subscription.id);
            drop(lanes);
            self.settle(&subscription, &delivery, Err("delivery lane closed".to_string()));
        }
    }

    fn close_lanes(&self, removed: &[Arc<Subscription>]) {
        let mut lanes = self.lanes.lock();
        for subscription in removed {
            lanes.remove(&subscription.id);
        }
    }

    /// Run one handler under a dispatch permit and settle the outcome.
    async fn deliver(&self, subscription: &Subscription, delivery: &Delivery) {
        let outcome = match self.dispatch.acquire().await {
            Ok(permit) => {
                let outcome = invoke(subscription, &delivery.message).await;
                drop(permit);
                outcome
            }
            Err(e) => Err(e.to_string()),
        };
        self.settle(subscription, delivery, outcome);
    }

    fn settle(&self, subscription: &Subscription, delivery: &Delivery, outcome: Result<(), String>) {
        let message = &delivery.message;
        match outcome {
            Ok(()) => {
                subscription.record_delivery();
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                delivery.report.lock().processed_count += 1;
            }
            Err(error) => {
                warn!(
                    subscription = %subscription.id,
                    module = %subscription.subscriber_module,
                    channel = %message.channel,
                    message_type = %message.message_type,
                    %error,
                    "Message handler failed"
                );
                subscription.record_error(message.id, error.clone());
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                delivery.report.lock().errors.push(error);
            }
        }
        self.release(delivery);
    }

    /// One subscription is done with `delivery`; the last one completes it.
    fn release(&self, delivery: &Delivery) {
        if delivery.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let report = delivery.report.lock().clone();
        if let Some(channel) = self.channels.get(&delivery.message.channel) {
            channel.record_delivered(u64::from(report.processed_count));
        }
        if !report.errors.is_empty() {
            debug!(
                id = %report.message_id,
                processed = report.processed_count,
                failed = report.errors.len(),
                "Delivery completed with handler failures"
            );
        }
        self.finish(1);
    }

    fn finish(&self, count: usize) {
        if count > 0 && self.pending.fetch_sub(count, Ordering::AcqRel) == count {
            self.drained.notify_waiters();
        }
    }
}

/// Run one handler, converting errors and panics into a recorded failure.
async fn invoke(subscription: &Subscription, message: &BusMessage) -> Result<(), String> {
    let handler = subscription.handler();
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message("handler", panic.as_ref())),
    }
}
