//! # Hooks
//!
//! Interception points installed on a bus: the error handler receiving
//! incidents, the mediator rewriting each batch before delivery, and
//! inspectors observing bus activity for tooling.

use crate::event::EventItem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Receives human-readable incident descriptions with structured context.
pub type ErrorHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Rewrites the batch of a delivery cycle. May drop, add or reorder items.
pub type Mediator = Arc<dyn Fn(Vec<EventItem>) -> Vec<EventItem> + Send + Sync>;

/// Observes bus activity. Must not panic: panics propagate to the caller of
/// the bus operation that triggered the notification.
pub type Inspector = Arc<dyn Fn(&InspectorInfo) + Send + Sync>;

/// Registration of an inspector, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InspectorId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectorAction {
    Subscribe,
    Unsubscribe,
    Publish,
    Deliver,
}

/// One observed action.
///
/// `source` is the subscriber id for (un)subscribe and the sender for
/// publish/deliver; `target` is the receiving subscriber id on deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorInfo {
    pub action: InspectorAction,
    pub source: Option<String>,
    pub target: Option<String>,
    pub topic: String,
    pub cycle_id: Option<u64>,
    pub payload: Option<Value>,
}

/// Handler installed when none is configured: logs through `tracing`.
pub(crate) fn log_incident(message: &str, context: &Value) {
    tracing::error!(context = %context, "{message}");
}
