//! Integration tests against the public bus API.

pub mod flows;
