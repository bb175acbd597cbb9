//! Core type definitions for Switchyard.
//!
//! Broken down into submodules: the model catalog, requests, responses and
//! provider health.

pub mod health;
pub mod model;
pub mod request;
pub mod response;

pub use health::*;
pub use model::*;
pub use request::*;
pub use response::*;
