//! Bus configuration.
//!
//! # Example
//!
//! ```
//! use event_bus::BusConfig;
//! use std::time::Duration;
//!
//! let config = BusConfig::default()
//!     .with_pending_did_timeout(Duration::from_secs(5))
//!     .with_trace_capacity(256);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Upper bound for the bounded activity trace.
pub const MAX_TRACE_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// How long a request waits for announced `did` responses.
    pub pending_did_timeout: Duration,
    /// Entries kept by the built-in activity trace. `0` disables it.
    pub trace_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pending_did_timeout: Duration::from_millis(Self::DEFAULT_PENDING_DID_TIMEOUT_MS),
            trace_capacity: 0,
        }
    }
}

impl BusConfig {
    /// Default pending `did` timeout: two minutes.
    pub const DEFAULT_PENDING_DID_TIMEOUT_MS: u64 = 120_000;

    /// Read configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_PENDING_DID_TIMEOUT_MS`: request timeout (default: 120000)
    /// - `EVENT_BUS_TRACE_CAPACITY`: trace entries kept (default: 0)
    ///
    /// Unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from `EVENT_BUS_*` values supplied by `lookup`.
    /// Missing or unparseable values fall back to the defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            pending_did_timeout: lookup("EVENT_BUS_PENDING_DID_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.pending_did_timeout),
            trace_capacity: lookup("EVENT_BUS_TRACE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trace_capacity),
        }
    }

    pub fn validate(&self) -> Result<(), BusError> {
        if self.pending_did_timeout.is_zero() {
            return Err(BusError::InvalidConfig(
                "pending_did_timeout cannot be 0".to_string(),
            ));
        }
        if self.trace_capacity > MAX_TRACE_CAPACITY {
            return Err(BusError::InvalidConfig(format!(
                "trace_capacity {} exceeds {MAX_TRACE_CAPACITY}",
                self.trace_capacity
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_pending_did_timeout(mut self, timeout: Duration) -> Self {
        self.pending_did_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }
}
