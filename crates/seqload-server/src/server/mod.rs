//! Wiring for the `seqload-server` binary.
//!
//! - [`config`] - CLI/environment options and their validated form.
//! - [`telemetry`] - log subscriber, optional metrics and the cycle observer
//!   that feeds them.

pub mod config;
pub mod telemetry;
