//! # Events
//!
//! Event items as they travel through a delivery cycle, the metadata
//! attached to them, and the payload wrapper handed to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Options accepted by [`EventBus::publish`](crate::EventBus::publish).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Identity of the publisher, visible to subscribers and inspectors.
    pub sender: Option<String>,
    /// When `false`, a subscriber whose id equals `sender` is skipped.
    pub deliver_to_sender: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            sender: None,
            deliver_to_sender: true,
        }
    }
}

impl PublishOptions {
    /// Publish on behalf of `sender`.
    #[must_use]
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn deliver_to_sender(mut self, deliver: bool) -> Self {
        self.deliver_to_sender = deliver;
        self
    }
}

/// Options accepted by [`EventBus::subscribe`](crate::EventBus::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Identity of the subscriber, compared against the sender of events.
    pub subscriber_id: Option<String>,
    /// When `true` (default) the handler gets a payload it may mutate
    /// without affecting other subscribers. When `false` it gets a frozen
    /// reference shared with every other non-cloning subscriber.
    pub clone_events: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            subscriber_id: None,
            clone_events: true,
        }
    }
}

impl SubscribeOptions {
    #[must_use]
    pub fn from_subscriber(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: Some(subscriber_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn clone_events(mut self, clone_events: bool) -> Self {
        self.clone_events = clone_events;
        self
    }
}

/// Options accepted by
/// [`EventBus::publish_and_gather_replies`](crate::EventBus::publish_and_gather_replies).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub sender: Option<String>,
    pub deliver_to_sender: Option<bool>,
    /// Overrides the bus-wide pending `did` timeout for this request.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            sender: self.sender.clone(),
            deliver_to_sender: self.deliver_to_sender.unwrap_or(true),
        }
    }
}

/// Metadata travelling with every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub topic: String,
    /// Delivery cycle. `None` until the item is processed, unless it was
    /// published while another event was being delivered.
    pub cycle_id: Option<u64>,
    pub sender: Option<String>,
    /// Sender of the event whose delivery triggered this publish.
    pub initiator: Option<String>,
    pub options: PublishOptions,
}

/// Event payload as seen by one subscriber.
///
/// The value is held once per event behind an `Arc`. A cloning subscriber
/// may take a mutable view, which copies the value on first write; a
/// frozen payload refuses mutable access.
#[derive(Clone, PartialEq)]
pub struct Payload {
    value: Arc<Value>,
    frozen: bool,
}

impl Payload {
    pub(crate) fn cloned(value: Arc<Value>) -> Self {
        Self { value, frozen: false }
    }

    pub(crate) fn frozen(value: Arc<Value>) -> Self {
        Self { value, frozen: true }
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mutable access for cloning subscribers; `None` when frozen.
    pub fn make_mut(&mut self) -> Option<&mut Value> {
        if self.frozen {
            return None;
        }
        Some(Arc::make_mut(&mut self.value))
    }

    /// Take an owned copy of the value. Never aliases other subscribers.
    #[must_use]
    pub fn into_owned(self) -> Value {
        Arc::try_unwrap(self.value).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Deserialize the payload into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&*self.value)
    }
}

impl Deref for Payload {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("value", &*self.value)
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// What a handler receives for one delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Payload,
    pub meta: EventMeta,
}

impl Delivery {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.meta.topic
    }

    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.meta.sender.as_deref()
    }
}

/// One `did` response collected by a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub event: Value,
    pub meta: EventMeta,
}

/// Continuation settling a publisher once its event has been delivered.
///
/// Dropping an unresolved resolver settles it, so an item discarded by a
/// mediator never leaves its publisher waiting.
pub(crate) struct Resolver(Option<Box<dyn FnOnce() + Send>>);

impl Resolver {
    pub(crate) fn new(settle: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(settle)))
    }

    pub(crate) fn none() -> Self {
        Self(None)
    }

    pub(crate) fn resolve(mut self) {
        if let Some(settle) = self.0.take() {
            settle();
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(settle) = self.0.take() {
            settle();
        }
    }
}

/// An event queued for the next delivery cycle.
///
/// Mediators receive and return these; items they create with
/// [`EventItem::new`] have no publisher waiting on them. The item is routed
/// by `meta.topic`.
pub struct EventItem {
    pub payload: Value,
    pub meta: EventMeta,
    pub(crate) resolver: Resolver,
}

impl EventItem {
    /// Build an item outside of `publish`, e.g. inside a mediator.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: Value, options: PublishOptions) -> Self {
        Self {
            meta: EventMeta {
                topic: topic.into(),
                cycle_id: None,
                sender: options.sender.clone(),
                initiator: None,
                options,
            },
            payload,
            resolver: Resolver::none(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.meta.topic
    }
}

impl fmt::Debug for EventItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventItem")
            .field("topic", &self.meta.topic)
            .field("payload", &self.payload)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
