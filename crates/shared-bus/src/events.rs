//! # Events and Event History
//!
//! Events are higher-level notifications. Each one travels through the bus
//! wrapped in a message of type `Event:<name>` and may also be persisted in
//! a bounded FIFO history for audit and query.

use crate::pattern::TypePattern;
use serde::{Deserialize, Serialize};
use shared_types::{now, EventSource, Payload, Timestamp};
use std::collections::VecDeque;
use uuid::Uuid;

/// Message type prefix for wrapped events.
pub const EVENT_TYPE_PREFIX: &str = "Event:";

/// Channel used when an event is raised without one.
pub const DEFAULT_EVENT_CHANNEL: &str = "Events";

/// A persisted, optionally broadcast notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: Uuid,
    pub name: String,
    pub data: Payload,
    pub channel: String,
    pub source: EventSource,
    pub timestamp: Timestamp,
}

impl BusEvent {
    pub fn new(
        name: impl Into<String>,
        data: Payload,
        channel: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            data,
            channel: channel.into(),
            source,
            timestamp: now(),
        }
    }

    /// Message type of the wrapping bus message.
    pub fn message_type(&self) -> String {
        format!("{EVENT_TYPE_PREFIX}{}", self.name)
    }
}

/// Options for raising an event.
#[derive(Debug, Clone)]
pub struct EventOptions {
    pub channel: String,
    pub source: EventSource,
    /// Keep the event in history.
    pub persist: bool,
    /// Publish on every existing channel instead of only `channel`.
    pub broadcast: bool,
    pub priority: shared_types::Priority,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            channel: DEFAULT_EVENT_CHANNEL.to_string(),
            source: EventSource::default(),
            persist: true,
            broadcast: false,
            priority: shared_types::Priority::Normal,
        }
    }
}

impl EventOptions {
    pub fn on_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    pub fn source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn transient(mut self) -> Self {
        self.persist = false;
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }
}

/// History query. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Glob over the event name.
    pub name: Option<String>,
    pub channel: Option<String>,
    pub source_module: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    fn compile(&self) -> CompiledQuery<'_> {
        CompiledQuery {
            query: self,
            name: self.name.as_deref().map(TypePattern::compile),
        }
    }
}

struct CompiledQuery<'a> {
    query: &'a EventQuery,
    name: Option<TypePattern>,
}

impl CompiledQuery<'_> {
    fn matches(&self, event: &BusEvent) -> bool {
        let q = self.query;
        self.name.as_ref().map_or(true, |p| p.matches(&event.name))
            && q.channel.as_ref().map_or(true, |c| &event.channel == c)
            && q
                .source_module
                .as_ref()
                .map_or(true, |m| &event.source.module == m)
            && q.since.map_or(true, |since| event.timestamp >= since)
            && q.until.map_or(true, |until| event.timestamp <= until)
    }
}

/// Filter for bulk history removal. An empty filter clears everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryClearFilter {
    /// Glob over the event name.
    pub name: Option<String>,
    pub channel: Option<String>,
    /// Remove only events strictly older than this.
    pub older_than: Option<Timestamp>,
}

/// Bounded FIFO of persisted events. The oldest event is evicted when full.
#[derive(Debug)]
pub struct EventHistory {
    capacity: usize,
    events: VecDeque<BusEvent>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::new(),
        }
    }

    /// Append an event, returning how many were evicted to make room.
    pub fn push(&mut self, event: BusEvent) -> usize {
        let mut evicted = 0;
        while self.events.len() >= self.capacity {
            self.events.pop_front();
            evicted += 1;
        }
        self.events.push_back(event);
        evicted
    }

    /// Matching events, oldest first.
    pub fn query(&self, query: &EventQuery) -> Vec<BusEvent> {
        let compiled = query.compile();
        let mut matched: Vec<BusEvent> = self
            .events
            .iter()
            .filter(|e| compiled.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    /// Remove matching events, keeping the rest in order.
    pub fn clear(&mut self, filter: &HistoryClearFilter) -> usize {
        let name = filter.name.as_deref().map(TypePattern::compile);
        let before = self.events.len();
        self.events.retain(|e| {
            let selected = name.as_ref().map_or(true, |p| p.matches(&e.name))
                && filter.channel.as_ref().map_or(true, |c| &e.channel == c)
                && filter.older_than.map_or(true, |t| e.timestamp < t);
            !selected
        });
        before - self.events.len()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
