//! # Subscribers
//!
//! Handlers and the subscriptions the topic tree stores for them.

use crate::event::Delivery;
use crate::topic::Weight;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a [`Handler`], stable across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Identity of one subscription inside one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

type Callback = dyn Fn(Delivery) -> anyhow::Result<()> + Send + Sync;

/// A subscriber callback with a stable identity.
///
/// Clones share the identity, so a handler subscribed under several topics
/// can be removed from all of them with a single
/// [`EventBus::unsubscribe`](crate::EventBus::unsubscribe). The same handler
/// may be registered on independent buses.
///
/// Returning an error (or panicking) marks the delivery as a subscriber
/// fault; the bus reports it and keeps delivering to the remaining
/// subscribers.
#[derive(Clone)]
pub struct Handler {
    id: HandlerId,
    callback: Arc<Callback>,
}

impl Handler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Delivery) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn call(&self, delivery: Delivery) -> anyhow::Result<()> {
        (self.callback)(delivery)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.id).finish()
    }
}

/// A handler registered under one topic.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: String,
    pub handler: Handler,
    pub subscriber_id: Option<String>,
    /// Fixed at subscribe time.
    pub weight: Weight,
    pub clone_events: bool,
}

impl Subscription {
    /// Whether an event from `sender` must skip this subscription.
    pub(crate) fn excludes_sender(&self, sender: Option<&str>, deliver_to_sender: bool) -> bool {
        !deliver_to_sender && sender.is_some() && self.subscriber_id.as_deref() == sender
    }
}
