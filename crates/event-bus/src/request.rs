//! # Request Coordinator
//!
//! The request-will-did protocol on top of plain publish/subscribe:
//!
//! 1. The requester publishes `<verb>Request`.
//! 2. Responders that need time announce themselves with `will<Verb>`.
//! 3. Responders answer with `did<Verb>`, announced or not.
//!
//! The request completes once the request event has been delivered and
//! every announced responder has answered. If the deadline passes first,
//! it fails with the replies collected so far.

use crate::bus::{BusInner, EventBus};
use crate::error::BusError;
use crate::event::{Reply, RequestOptions, Resolver, SubscribeOptions};
use crate::scheduler::TimerId;
use crate::subscriber::Handler;
use crate::topic::{validate_published_topic, RequestTopics};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Outcome = Result<Vec<Reply>, BusError>;

struct Session {
    topics: RequestTopics,
    awaiting: BTreeSet<String>,
    replies: Vec<Reply>,
    /// The request event has been delivered and its cascade drained.
    cycle_finished: bool,
    timer: Option<TimerId>,
    handlers: Vec<Handler>,
    /// Taken on completion; `None` means the session is over.
    outcome: Option<oneshot::Sender<Outcome>>,
}

impl Session {
    fn is_open(&self) -> bool {
        self.outcome.is_some()
    }
}

type SharedSession = Arc<Mutex<Session>>;

impl EventBus {
    /// Publish a `<verb>Request` event and gather the `did<Verb>` replies.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidArgument` when the topic does not follow the
    /// `<verb>Request[.qualifier]` form, `BusError::Serialization` when the
    /// payload is not representable as JSON. The returned receipt fails with
    /// `BusError::RequestTimeout` when announced responders stay silent.
    pub fn publish_and_gather_replies<P: Serialize>(
        &self,
        topic: &str,
        payload: P,
        options: RequestOptions,
    ) -> Result<RequestReceipt, BusError> {
        let topics = RequestTopics::derive(topic)?;
        validate_published_topic(topic)?;
        let payload = serde_json::to_value(payload)?;
        let timeout = options
            .timeout
            .unwrap_or(self.inner.config.pending_did_timeout);

        let (tx, rx) = oneshot::channel();
        let session: SharedSession = Arc::new(Mutex::new(Session {
            topics: topics.clone(),
            awaiting: BTreeSet::new(),
            replies: Vec::new(),
            cycle_finished: false,
            timer: None,
            handlers: Vec::new(),
            outcome: Some(tx),
        }));

        let bus = Arc::downgrade(&self.inner);
        let will = will_handler(session.clone());
        let did = did_handler(bus.clone(), session.clone());
        let subscribe_options = SubscribeOptions {
            subscriber_id: options.sender.clone(),
            clone_events: true,
        };
        self.inner
            .subscribe(&topics.will, &will, subscribe_options.clone())?;
        self.inner.subscribe(&topics.did, &did, subscribe_options)?;

        let deadline = {
            let bus = bus.clone();
            let session = session.clone();
            Box::new(move || match bus.upgrade() {
                Some(bus) => finish(&bus, &session, true),
                None => abandon(&session),
            })
        };
        let timer = self.inner.scheduler.set_timeout(deadline, timeout);
        {
            let mut state = session.lock();
            state.timer = Some(timer);
            state.handlers = vec![will, did];
        }

        debug!(topic, timeout_ms = timeout.as_millis() as u64, "Request published");
        let resolver = Resolver::new(move || match bus.upgrade() {
            Some(bus) => request_delivered(&bus, &session),
            None => abandon(&session),
        });
        self.inner
            .enqueue(topic, payload, options.publish_options(), resolver);

        Ok(RequestReceipt { rx })
    }
}

fn will_handler(session: SharedSession) -> Handler {
    Handler::new(move |delivery| {
        let sender = delivery
            .meta
            .sender
            .clone()
            .ok_or_else(|| BusError::MissingSender {
                topic: delivery.meta.topic.clone(),
            })?;
        let mut state = session.lock();
        if state.is_open() {
            state.awaiting.insert(sender);
        }
        Ok(())
    })
}

fn did_handler(bus: Weak<BusInner>, session: SharedSession) -> Handler {
    Handler::new(move |delivery| {
        let complete = {
            let mut state = session.lock();
            if !state.is_open() {
                return Ok(());
            }
            if let Some(sender) = &delivery.meta.sender {
                state.awaiting.remove(sender);
            }
            state.replies.push(Reply {
                event: delivery.payload.into_owned(),
                meta: delivery.meta,
            });
            state.cycle_finished && state.awaiting.is_empty()
        };
        if complete {
            if let Some(bus) = bus.upgrade() {
                finish(&bus, &session, false);
            }
        }
        Ok(())
    })
}

fn request_delivered(bus: &BusInner, session: &Mutex<Session>) {
    let complete = {
        let mut state = session.lock();
        state.cycle_finished = true;
        state.awaiting.is_empty()
    };
    if complete {
        finish(bus, session, false);
    }
}

/// End the session. A deadline with responders still outstanding fails the
/// request; every other path fulfills it.
fn finish(bus: &BusInner, session: &Mutex<Session>, deadline: bool) {
    let (outcome, timer, handlers, result) = {
        let mut state = session.lock();
        let Some(outcome) = state.outcome.take() else {
            return;
        };
        let replies = mem::take(&mut state.replies);
        let result = if deadline && !state.awaiting.is_empty() {
            Err(BusError::RequestTimeout {
                topic: state.topics.request.clone(),
                missing: state.awaiting.iter().cloned().collect(),
                replies,
            })
        } else {
            Ok(replies)
        };
        (outcome, state.timer.take(), mem::take(&mut state.handlers), result)
    };

    if let Some(timer) = timer {
        bus.scheduler.clear_timeout(timer);
    }
    for handler in &handlers {
        bus.unsubscribe(handler);
    }
    bus.metrics.record_request(result.is_err());

    match &result {
        Ok(replies) => debug!(replies = replies.len(), "Request fulfilled"),
        Err(err) => {
            if let BusError::RequestTimeout { topic, missing, replies } = err {
                warn!(topic = %topic, missing = ?missing, "Request timed out");
                bus.report(
                    &err.to_string(),
                    &json!({
                        "topic": topic,
                        "missing": missing,
                        "replies": replies.len(),
                    }),
                );
            }
        }
    }
    let _ = outcome.send(result);
}

/// The bus went away before the request completed.
fn abandon(session: &Mutex<Session>) {
    let (outcome, handlers) = {
        let mut state = session.lock();
        (state.outcome.take(), mem::take(&mut state.handlers))
    };
    drop(handlers);
    if let Some(outcome) = outcome {
        let _ = outcome.send(Err(BusError::Closed));
    }
}

/// Completes with the `did` replies of a request, or with
/// `BusError::RequestTimeout` carrying the partial replies.
#[derive(Debug)]
pub struct RequestReceipt {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for RequestReceipt {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BusError::Closed)))
    }
}
