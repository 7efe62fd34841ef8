//! Data model shared between the engine, the tools and presenters

pub mod events;
pub mod key;
pub mod stats;
