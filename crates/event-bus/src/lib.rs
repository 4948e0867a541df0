//! # Event Bus - In-Process Topic Routing
//!
//! Decoupled components talk through named topics instead of calling each
//! other. Publishing never delivers synchronously: events queue up and are
//! delivered together in a later scheduler tick (a *cycle*).
//!
//! ## Topics
//!
//! ```text
//! order.created.eu          segments, separated by '.'
//! order..eu                 an empty segment matches any one segment
//!                           (subscriptions only)
//! order.created-urgent      sub-topic: reaches "order.created" subscribers
//! ```
//!
//! A subscription receives every event whose topic equals it or starts with
//! it at a segment boundary. More specific subscriptions are served first.
//!
//! ## Delivery Cycle
//!
//! ```text
//!  publish() ─┐
//!  publish() ─┼─► queue ──(tick)──► mediator ──► deliver to matching handlers
//!  publish() ─┘                                        │
//!                     ▲                                │ handlers publish more
//!                     └────────────────────────────────┘
//! ```
//!
//! A publish receipt completes only once the cascade its event triggered has
//! fully drained.
//!
//! ## Request / Will / Did
//!
//! [`EventBus::publish_and_gather_replies`] publishes `<verb>Request` and
//! collects `did<Verb>` replies. Responders needing time announce themselves
//! with `will<Verb>`; the request waits for them up to a deadline.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
mod cycle;
pub mod error;
pub mod event;
pub mod hooks;
pub mod metrics;
pub mod request;
pub mod scheduler;
pub mod subscriber;
pub mod topic;
pub mod trace;
pub mod tree;

// Re-export main types
pub use bus::{EventBus, PublishReceipt};
pub use config::BusConfig;
pub use error::BusError;
pub use event::{
    Delivery, EventItem, EventMeta, Payload, PublishOptions, Reply, RequestOptions,
    SubscribeOptions,
};
pub use hooks::{ErrorHandler, Inspector, InspectorAction, InspectorId, InspectorInfo, Mediator};
pub use metrics::BusStats;
pub use request::RequestReceipt;
pub use scheduler::{ManualScheduler, Scheduler, Task, TimerId, TokioScheduler};
pub use subscriber::{Handler, HandlerId, SubscriptionId};
pub use topic::{RequestTopics, Weight};
pub use trace::TraceRecorder;
