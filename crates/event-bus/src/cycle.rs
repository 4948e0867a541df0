//! # Cycle Processor
//!
//! Drains the queue in delivery cycles. One deferred pass keeps running
//! cycles until delivery stops producing new events, so a reaction chain
//! completes within a single scheduled tick.
//!
//! Publisher receipts are reconciled across cycles: resolvers of a cycle are
//! carried forward while the cycle produced follow-up events, and released
//! together once a cycle ends with an empty queue. A publisher therefore
//! observes the delivery of synchronous reactions to its event before its
//! receipt completes, while an event without reactions completes on the
//! very next tick.

use crate::bus::{notify, BusInner, DeliveryContext};
use crate::error::BusError;
use crate::event::{Delivery, EventItem, EventMeta, Payload, Resolver};
use crate::hooks::{InspectorAction, InspectorInfo};
use crate::subscriber::Subscription;
use crate::topic::validate_published_topic;
use serde_json::{json, Value};
use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

impl BusInner {
    /// Entry point of the deferred processing pass.
    pub(crate) fn process_queue(self: &Arc<Self>) {
        let _pass = PassGuard { bus: self };
        loop {
            let (batch, mediator) = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    state.scheduled = false;
                    let carried = mem::take(&mut state.carried);
                    drop(state);
                    carried.into_iter().for_each(Resolver::resolve);
                    return;
                }
                (mem::take(&mut state.queue), state.mediator.clone())
            };

            let items = match mediator {
                Some(mediator) => self.screen_mediated(mediator(batch)),
                None => batch,
            };
            let event_count = items.len();

            let settled: Vec<Resolver> = items
                .into_iter()
                .filter_map(|item| self.deliver(item))
                .collect();

            let ready = {
                let mut state = self.state.lock();
                state.delivering = None;
                if state.queue.is_empty() {
                    let mut ready = mem::take(&mut state.carried);
                    ready.extend(settled);
                    ready
                } else {
                    state.carried.extend(settled);
                    Vec::new()
                }
            };

            self.metrics.record_cycle();
            debug!(events = event_count, settled = ready.len(), "Delivery cycle complete");
            ready.into_iter().for_each(Resolver::resolve);
        }
    }

    /// Deliver one item. Returns its resolver when it still has to be
    /// reconciled with later cycles.
    fn deliver(&self, item: EventItem) -> Option<Resolver> {
        let EventItem {
            payload,
            mut meta,
            resolver,
        } = item;
        let topic = meta.topic.clone();

        let (subscriptions, inspectors) = {
            let mut state = self.state.lock();
            let cycle_id = match meta.cycle_id {
                Some(cycle_id) => cycle_id,
                None => {
                    let cycle_id = state.next_cycle;
                    state.next_cycle += 1;
                    cycle_id
                }
            };
            meta.cycle_id = Some(cycle_id);
            state.delivering = Some(DeliveryContext {
                cycle_id,
                sender: meta.sender.clone(),
                thread: thread::current().id(),
            });
            (state.tree.matching(&topic), state.inspectors())
        };

        if subscriptions.is_empty() {
            trace!(topic = %topic, "No subscribers");
            resolver.resolve();
            return None;
        }

        let payload = Arc::new(payload);
        for subscription in &subscriptions {
            if subscription.excludes_sender(meta.sender.as_deref(), meta.options.deliver_to_sender) {
                continue;
            }

            let delivery = Delivery {
                payload: if subscription.clone_events {
                    Payload::cloned(payload.clone())
                } else {
                    Payload::frozen(payload.clone())
                },
                meta: meta.clone(),
            };

            self.metrics.record_delivery();
            notify(&inspectors, || InspectorInfo {
                action: InspectorAction::Deliver,
                source: meta.sender.clone(),
                target: subscription.subscriber_id.clone(),
                topic: topic.clone(),
                cycle_id: meta.cycle_id,
                payload: Some((*payload).clone()),
            });

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscription.handler.call(delivery)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.report_fault(subscription, &payload, &meta, failure);
        }

        Some(resolver)
    }

    /// Drop mediator output with unpublishable topics, reporting each one.
    /// Dropping an item settles its publisher.
    fn screen_mediated(&self, items: Vec<EventItem>) -> Vec<EventItem> {
        items
            .into_iter()
            .filter(|item| match validate_published_topic(item.topic()) {
                Ok(()) => true,
                Err(err) => {
                    self.report(
                        "mediator returned an unpublishable event",
                        &json!({
                            "error": err.to_string(),
                            "event": item.payload,
                            "meta": item.meta,
                        }),
                    );
                    false
                }
            })
            .collect()
    }

    fn report_fault(&self, subscription: &Subscription, payload: &Value, meta: &EventMeta, error: String) {
        self.metrics.record_fault();
        let fault = BusError::SubscriberFault {
            topic: meta.topic.clone(),
            message: error,
        };
        let context = json!({
            "error": fault.to_string(),
            "event": payload,
            "meta": meta,
            "subscriber": {
                "topic": subscription.topic,
                "subscriber_id": subscription.subscriber_id,
            },
        });
        self.report(
            &format!(
                "error while delivering {} to subscriber of {}",
                meta.topic, subscription.topic
            ),
            &context,
        );
    }
}

/// Clears the pass state if an inspector panic unwinds out of a pass, so the
/// next publish schedules again.
struct PassGuard<'a> {
    bus: &'a BusInner,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut state = self.bus.state.lock();
            state.scheduled = false;
            state.delivering = None;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}
