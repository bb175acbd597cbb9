#![deny(unused)]
//! Model layer for Switchyard.
//!
//! This crate provides:
//! - The model registry and catalog loading
//! - Per-provider circuit breakers
//! - Candidate selection and ordering
//! - Provider adapters (Rig-backed and mock)

pub mod circuit_breaker;
pub mod config;
pub mod providers;
pub mod registry;
pub mod rig_client;
pub mod router;

pub use circuit_breaker::{Admission, CircuitBreaker};
pub use config::ModelCatalog;
pub use providers::{build_provider, MockOutcome, MockProvider, ProviderMap};
pub use registry::{ModelFilter, ModelRegistry};
pub use rig_client::{RigBackend, RigEmbedder, RigProvider};
pub use router::{Candidate, LlmRouter};
