#![deny(unused)]
//! Governance for Switchyard.
//!
//! This crate provides:
//! - Per-agent rate limiting
//! - Distributed tracing
//! - Prometheus metrics helpers

pub mod metrics;
pub mod rate_limit;
pub mod tracing_layer;

pub use metrics::{setup_metrics_recorder, track_cache_lookup, track_request, track_tokens};
pub use rate_limit::{RateLimiter, RateLimits};
pub use tracing_layer::configure_tracing;
