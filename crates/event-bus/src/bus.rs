//! # Event Bus
//!
//! The public façade. An [`EventBus`] is a cheap handle around shared state;
//! clones address the same bus. Handlers may publish, subscribe and
//! unsubscribe re-entrantly: no internal lock is held while user code runs.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::event::{EventItem, EventMeta, PublishOptions, Resolver, SubscribeOptions};
use crate::hooks::{
    log_incident, ErrorHandler, Inspector, InspectorAction, InspectorId, InspectorInfo, Mediator,
};
use crate::metrics::{BusStats, Metrics};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::subscriber::{Handler, HandlerId, Subscription, SubscriptionId};
use crate::topic::{validate_published_topic, validate_subscription_topic, Weight};
use crate::trace::TraceRecorder;
use crate::tree::TopicTree;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;
use tracing::debug;

/// Mutable bus state. Only touched under `BusInner::state`.
pub(crate) struct BusState {
    pub(crate) tree: TopicTree,
    registry: HashMap<HandlerId, Vec<(String, SubscriptionId)>>,
    pub(crate) queue: Vec<EventItem>,
    /// A processing pass is deferred or running.
    pub(crate) scheduled: bool,
    /// Resolvers of earlier cycles waiting for the cascade to drain.
    pub(crate) carried: Vec<Resolver>,
    /// Event being delivered by the running processing pass, if any.
    pub(crate) delivering: Option<DeliveryContext>,
    pub(crate) next_cycle: u64,
    next_subscription: u64,
    next_inspector: u64,
    pub(crate) mediator: Option<Mediator>,
    inspectors: Vec<(InspectorId, Inspector)>,
    error_handler: ErrorHandler,
}

impl BusState {
    fn new() -> Self {
        Self {
            tree: TopicTree::new(),
            registry: HashMap::new(),
            queue: Vec::new(),
            scheduled: false,
            carried: Vec::new(),
            delivering: None,
            next_cycle: 0,
            next_subscription: 0,
            next_inspector: 0,
            mediator: None,
            inspectors: Vec::new(),
            error_handler: Arc::new(log_incident),
        }
    }

    /// Cycle id and sender to inherit for an action taken on the calling
    /// thread. Only a handler running on the delivering thread inherits them.
    pub(crate) fn inherited(&self) -> (Option<u64>, Option<String>) {
        match &self.delivering {
            Some(context) if context.thread == thread::current().id() => {
                (Some(context.cycle_id), context.sender.clone())
            }
            _ => (None, None),
        }
    }

    pub(crate) fn inspectors(&self) -> Vec<Inspector> {
        self.inspectors.iter().map(|(_, inspector)| inspector.clone()).collect()
    }

    fn add_inspector(&mut self, inspector: Inspector) -> InspectorId {
        let id = InspectorId(self.next_inspector);
        self.next_inspector += 1;
        self.inspectors.push((id, inspector));
        id
    }
}

/// The delivery in progress and the thread running its handlers.
pub(crate) struct DeliveryContext {
    pub(crate) cycle_id: u64,
    pub(crate) sender: Option<String>,
    pub(crate) thread: ThreadId,
}

/// Call every inspector with lazily built info.
pub(crate) fn notify(inspectors: &[Inspector], build: impl FnOnce() -> InspectorInfo) {
    if inspectors.is_empty() {
        return;
    }
    let info = build();
    for inspector in inspectors {
        inspector(&info);
    }
}

pub(crate) struct BusInner {
    pub(crate) state: Mutex<BusState>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) config: BusConfig,
    pub(crate) metrics: Metrics,
    trace: Option<TraceRecorder>,
}

impl BusInner {
    pub(crate) fn subscribe(
        &self,
        topic: &str,
        handler: &Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BusError> {
        validate_subscription_topic(topic)?;

        let (id, cycle_id, inspectors) = {
            let mut state = self.state.lock();
            let id = SubscriptionId(state.next_subscription);
            state.next_subscription += 1;
            state.tree.insert(Arc::new(Subscription {
                id,
                topic: topic.to_string(),
                handler: handler.clone(),
                subscriber_id: options.subscriber_id.clone(),
                weight: Weight::of(topic),
                clone_events: options.clone_events,
            }));
            state
                .registry
                .entry(handler.id())
                .or_default()
                .push((topic.to_string(), id));
            (id, state.inherited().0, state.inspectors())
        };

        debug!(topic, subscriber_id = ?options.subscriber_id, "Subscription created");
        notify(&inspectors, || InspectorInfo {
            action: InspectorAction::Subscribe,
            source: options.subscriber_id,
            target: None,
            topic: topic.to_string(),
            cycle_id,
            payload: None,
        });
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, handler: &Handler) -> usize {
        let (removed, cycle_id, inspectors) = {
            let mut state = self.state.lock();
            let Some(entries) = state.registry.remove(&handler.id()) else {
                return 0;
            };
            let removed: Vec<Arc<Subscription>> = entries
                .iter()
                .filter_map(|(topic, id)| state.tree.remove(topic, *id))
                .collect();
            (removed, state.inherited().0, state.inspectors())
        };

        debug!(handler = ?handler.id(), removed = removed.len(), "Handler unsubscribed");
        for subscription in &removed {
            notify(&inspectors, || InspectorInfo {
                action: InspectorAction::Unsubscribe,
                source: subscription.subscriber_id.clone(),
                target: None,
                topic: subscription.topic.clone(),
                cycle_id,
                payload: None,
            });
        }
        removed.len()
    }

    /// Queue an event and make sure a processing pass is deferred.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        topic: &str,
        payload: Value,
        options: PublishOptions,
        resolver: Resolver,
    ) {
        let (info, must_schedule, inspectors) = {
            let mut state = self.state.lock();
            let inspectors = state.inspectors();
            let (cycle_id, initiator) = state.inherited();
            let meta = EventMeta {
                topic: topic.to_string(),
                cycle_id,
                sender: options.sender.clone(),
                initiator,
                options,
            };
            let info = (!inspectors.is_empty()).then(|| InspectorInfo {
                action: InspectorAction::Publish,
                source: meta.sender.clone(),
                target: None,
                topic: topic.to_string(),
                cycle_id: meta.cycle_id,
                payload: Some(payload.clone()),
            });
            debug!(topic, cycle_id = ?meta.cycle_id, sender = ?meta.sender, "Event published");
            state.queue.push(EventItem {
                payload,
                meta,
                resolver,
            });
            let must_schedule = !state.scheduled;
            state.scheduled = true;
            (info, must_schedule, inspectors)
        };

        self.metrics.record_published();
        if must_schedule {
            let bus = Arc::downgrade(self);
            self.scheduler.defer(Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    bus.process_queue();
                }
            }));
        }
        if let Some(info) = info {
            notify(&inspectors, || info);
        }
    }

    /// Hand an incident to the installed error handler.
    pub(crate) fn report(&self, message: &str, context: &Value) {
        let handler = self.state.lock().error_handler.clone();
        handler(message, context);
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.queue.is_empty() {
            debug!(pending = state.queue.len(), "Event bus dropped with undelivered events");
        }
    }
}

/// In-process publish/subscribe router.
///
/// ```
/// use event_bus::{EventBus, Handler, ManualScheduler, PublishOptions, SubscribeOptions};
/// use std::sync::Arc;
///
/// let scheduler = ManualScheduler::new();
/// let bus = EventBus::new(Arc::new(scheduler.clone()));
///
/// let handler = Handler::new(|delivery| {
///     assert_eq!(delivery.topic(), "order.created");
///     Ok(())
/// });
/// bus.subscribe("order", &handler, SubscribeOptions::default()).unwrap();
/// bus.publish("order.created", 42, PublishOptions::default()).unwrap();
///
/// scheduler.run_until_idle();
/// assert_eq!(bus.stats().deliveries, 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    pub(crate) inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the default configuration.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::build(scheduler, BusConfig::default())
    }

    pub fn with_config(scheduler: Arc<dyn Scheduler>, config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        Ok(Self::build(scheduler, config))
    }

    /// Create a bus scheduled on the tokio runtime of the calling context.
    pub fn from_current_runtime(config: BusConfig) -> Result<Self, BusError> {
        Self::with_config(Arc::new(TokioScheduler::current()?), config)
    }

    fn build(scheduler: Arc<dyn Scheduler>, config: BusConfig) -> Self {
        let mut state = BusState::new();
        let trace = (config.trace_capacity > 0).then(|| TraceRecorder::new(config.trace_capacity));
        if let Some(trace) = &trace {
            state.add_inspector(trace.inspector());
        }
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(state),
                scheduler,
                config,
                metrics: Metrics::default(),
                trace,
            }),
        }
    }

    /// Register `handler` for events matching `topic`.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidArgument` for malformed topic names.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: &Handler,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, BusError> {
        self.inner.subscribe(topic, handler, options)
    }

    /// Remove every subscription of `handler`. Returns how many were removed.
    ///
    /// Events already being delivered to a snapshot that includes the handler
    /// still reach it.
    pub fn unsubscribe(&self, handler: &Handler) -> usize {
        self.inner.unsubscribe(handler)
    }

    /// Publish an event.
    ///
    /// The payload is serialized immediately, so later changes by the caller
    /// are not observed by subscribers. The returned receipt completes once
    /// the event and any cascade it triggered have been delivered.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidArgument` for wildcard or malformed topic names,
    /// `BusError::Serialization` when the payload is not representable as JSON.
    pub fn publish<P: Serialize>(
        &self,
        topic: &str,
        payload: P,
        options: PublishOptions,
    ) -> Result<PublishReceipt, BusError> {
        validate_published_topic(topic)?;
        let payload = serde_json::to_value(payload)?;

        let (tx, rx) = oneshot::channel();
        let resolver = Resolver::new(move || {
            let _ = tx.send(());
        });
        self.inner.enqueue(topic, payload, options, resolver);
        Ok(PublishReceipt { rx })
    }

    /// Install the incident sink. The default logs through `tracing`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.inner.state.lock().error_handler = Arc::new(handler);
    }

    /// Install a batch transform applied before every delivery cycle.
    pub fn set_mediator<F>(&self, mediator: F)
    where
        F: Fn(Vec<EventItem>) -> Vec<EventItem> + Send + Sync + 'static,
    {
        self.inner.state.lock().mediator = Some(Arc::new(mediator));
    }

    pub fn clear_mediator(&self) {
        self.inner.state.lock().mediator = None;
    }

    /// Observe subscribe, unsubscribe, publish and deliver actions.
    ///
    /// Inspector panics are not caught: they surface at the bus call that
    /// triggered the notification.
    pub fn add_inspector<F>(&self, inspector: F) -> InspectorId
    where
        F: Fn(&InspectorInfo) + Send + Sync + 'static,
    {
        self.inner.state.lock().add_inspector(Arc::new(inspector))
    }

    pub fn remove_inspector(&self, id: InspectorId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.inspectors.len();
        state.inspectors.retain(|(existing, _)| *existing != id);
        state.inspectors.len() != before
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.inner.metrics.snapshot()
    }

    /// The built-in activity trace, when `trace_capacity > 0`.
    #[must_use]
    pub fn trace(&self) -> Option<&TraceRecorder> {
        self.inner.trace.as_ref()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().tree.len()
    }

    /// Events queued for the next delivery cycle.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Completes once a published event has been delivered.
///
/// Also completes if the bus is dropped first or a mediator discards the
/// event.
#[derive(Debug)]
pub struct PublishReceipt {
    rx: oneshot::Receiver<()>,
}

impl Future for PublishReceipt {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}
