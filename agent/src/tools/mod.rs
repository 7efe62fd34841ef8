//! Tracing tools built on the correlation engine
//!
//! Each tool owns its state store, sink or ring, declares the probe points it
//! needs and interprets the raw events delivered for them.

pub mod ampstat;
pub mod numafaults;
pub mod scsinonrw;
pub mod tcp_latency;
pub mod tcp_ttfb;
pub mod tsastat;
pub mod writestat;

use latscope_shared::{DiscreteEvent, ProbePoint, RawEvent, Ratio};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ToolKind};
use crate::engine::{Diagnostics, EventRing};

pub use ampstat::{AmpReport, Ampstat};
pub use numafaults::{NumaReport, Numafaults};
pub use scsinonrw::Scsinonrw;
pub use tcp_latency::TcpLatency;
pub use tcp_ttfb::TcpTtfb;
pub use tsastat::{ThreadStateReport, Tsastat};
pub use writestat::{WriteReport, Writestat};

/// How a tool hands its results to the presenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Periodic read-and-clear of aggregated statistics
    Snapshot,
    /// One record per completed operation
    Streaming,
}

pub trait Tracer: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// Instrumentation points this tool needs attached
    fn probes(&self) -> &'static [ProbePoint];

    fn mode(&self) -> ExportMode;

    /// Process one probe hit. Must not block.
    fn handle(&self, event: &RawEvent);

    /// Read and clear the statistics gathered over `interval`
    fn take_report(&self, _interval: Duration) -> Option<Report> {
        None
    }

    /// Completed-event ring of a streaming tool
    fn events(&self) -> Option<&EventRing<DiscreteEvent>> {
        None
    }

    fn diagnostics(&self) -> Diagnostics;
}

/// One interval's output of an aggregating tool
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum Report {
    Ampstat(AmpReport),
    Numafaults(NumaReport),
    Tsastat(ThreadStateReport),
    Writestat(WriteReport),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Ampstat(r) => fmt::Display::fmt(r, f),
            Report::Numafaults(r) => fmt::Display::fmt(r, f),
            Report::Tsastat(r) => fmt::Display::fmt(r, f),
            Report::Writestat(r) => fmt::Display::fmt(r, f),
        }
    }
}

/// Create the tracer selected by `config.tool`
pub fn build(config: &Config) -> Arc<dyn Tracer> {
    match config.tool {
        ToolKind::Ampstat => Arc::new(Ampstat::new(config)),
        ToolKind::Numafaults => Arc::new(Numafaults::new(config)),
        ToolKind::Scsinonrw => Arc::new(Scsinonrw::new(config)),
        ToolKind::TcpLatency => Arc::new(TcpLatency::new(config)),
        ToolKind::TcpTtfb => Arc::new(TcpTtfb::new(config)),
        ToolKind::Tsastat => Arc::new(Tsastat::new(config)),
        ToolKind::Writestat => Arc::new(Writestat::new(config)),
    }
}


const MIB: f64 = 1024.0 * 1024.0;

/// Throughput in MiB/s over `interval`
pub(crate) fn mib_per_sec(bytes: u64, interval: Duration) -> Ratio {
    Ratio::of(bytes as f64 / MIB, interval.as_secs_f64())
}
