//! Shared types and utilities for latscope
//!
//! This crate contains the data model of the correlation engine: raw probe
//! events, correlation keys, aggregated statistics and the records handed to
//! presenters. It has no knowledge of how events are produced.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{events::*, key::*, stats::*};
