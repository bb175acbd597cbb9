#![deny(unused)]
//! Model-serving gateway for Switchyard.
//!
//! This crate provides the request pipeline and its HTTP entry point,
//! including semantic caching, admission control and streaming.

pub mod gateway;
pub mod inflight;
pub mod queue;
pub mod semantic_cache;
pub mod server;
pub mod stream;
pub mod usage;

pub use gateway::{ModelGateway, ModelGatewayBuilder};
pub use queue::{QueueSlot, RequestQueue};
pub use semantic_cache::{CacheLookup, CacheMatch, CacheStats, SemanticCache};
pub use server::{GatewayServer, status_for};
pub use stream::{GatewayStream, StreamOutcome};
pub use usage::{HttpUsageReporter, UsageBridge};
