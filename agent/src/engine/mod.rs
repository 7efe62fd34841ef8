//! Kernel event correlation and aggregation engine
//!
//! Probe records flow downward: the adapter normalizes them, the extractor
//! derives a key, the state store pairs starts with ends, and completed
//! operations land either in the per-core sink (snapshot tools) or in the
//! event ring (streaming tools).

pub mod adapter;
pub mod correlator;
pub mod extractor;
pub mod host;
pub mod ring;
pub mod sink;
pub mod store;

pub use adapter::{DecodeError, ProbeAdapter, ProbeRecord};
pub use correlator::{Correlator, Diagnostics};
pub use extractor::correlation_key;
pub use host::{AttachError, InstrumentationHost};
pub use ring::EventRing;
pub use sink::AggregationSink;
pub use store::{Advance, PutOutcome, StateStore};
