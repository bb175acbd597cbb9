//! Collaborator contracts for Switchyard.
//!
//! - `provider`: backend inference providers (ProviderAdapter)
//! - `embedding`: embedding generation for the semantic cache
//! - `usage`: usage-reporting sink

pub mod embedding;
pub mod provider;
pub mod usage;

pub use embedding::*;
pub use provider::*;
pub use usage::*;
