//! Error types for the event bus.

use crate::event::Reply;
use thiserror::Error;

/// Errors surfaced by event bus operations.
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// Malformed topic name or an argument the bus cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A `will` announcement was published without a sender identity.
    #[error("Missing sender for {topic}: will responses must identify their sender")]
    MissingSender { topic: String },

    /// A subscriber handler returned an error or panicked during delivery.
    #[error("Subscriber fault on {topic}: {message}")]
    SubscriberFault { topic: String, message: String },

    /// Not every announced responder answered before the deadline.
    #[error("Request {topic} timed out waiting for {missing:?}")]
    RequestTimeout {
        topic: String,
        missing: Vec<String>,
        replies: Vec<Reply>,
    },

    /// The payload could not be snapshotted as JSON.
    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    /// Configuration values out of range.
    #[error("Invalid bus configuration: {0}")]
    InvalidConfig(String),

    /// A tokio scheduler was requested outside of a runtime.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// The bus was dropped before the operation settled.
    #[error("Event bus closed")]
    Closed,
}

impl BusError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Replies collected before a request timed out. Empty for other errors.
    #[must_use]
    pub fn partial_replies(&self) -> &[Reply] {
        match self {
            Self::RequestTimeout { replies, .. } => replies,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
