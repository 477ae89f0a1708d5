//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod context;
pub mod error;
pub mod events;
pub mod groups;
pub mod ids;
pub mod interpolation;
pub mod ports;
pub mod run;
pub mod validation;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
