#![deny(unused)]
//! Core types, traits, and error definitions for Switchyard.
//!
//! This crate provides the building blocks shared by the routing, admission
//! and gateway layers: the request/response model, the provider, embedding
//! and usage contracts, configuration, and test doubles.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
