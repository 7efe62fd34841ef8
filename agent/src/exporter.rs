//! Export loops feeding the presenter
//!
//! Aggregating tools are read-and-cleared on a fixed interval; streaming tools
//! are drained through a timed poll on their ring. Both loops stop at the next
//! sleep or poll boundary once the cancellation token fires; the stream loop
//! then presents whatever is still buffered.

use anyhow::{Context, Result};
use latscope_shared::utils::time::system_time_nanos;
use latscope_shared::DiscreteEvent;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::Diagnostics;
use crate::session::SessionHandle;
use crate::tools::{ExportMode, Report};

/// One interval of an aggregating tool, as handed to presenters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Wall-clock time the snapshot was taken, in nanoseconds
    pub timestamp: u64,
    #[serde(flatten)]
    pub report: Report,
    pub diagnostics: Diagnostics,
}

pub trait Presenter: Send {
    fn snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    fn event(&mut self, event: &DiscreteEvent) -> Result<()>;

    /// Called once after tracing stopped
    fn finish(&mut self, _diagnostics: &Diagnostics) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub snapshots: u64,
    pub events: u64,
}

pub struct Exporter {
    interval: Duration,
    poll_timeout: Duration,
}

impl Exporter {
    pub fn new(config: &Config) -> Self {
        Self {
            interval: config.interval,
            poll_timeout: config.poll_timeout,
        }
    }

    pub fn with_timing(interval: Duration, poll_timeout: Duration) -> Self {
        Self {
            interval,
            poll_timeout,
        }
    }

    /// Run until `cancel` fires or the presenter fails
    pub async fn run(
        &self,
        session: &SessionHandle,
        presenter: &mut dyn Presenter,
        cancel: CancellationToken,
    ) -> Result<ExportSummary> {
        let summary = match session.tracer().mode() {
            ExportMode::Snapshot => self.run_snapshots(session, presenter, &cancel).await?,
            ExportMode::Streaming => self.run_stream(session, presenter, &cancel).await?,
        };

        info!(
            "Export finished: {} snapshots, {} events",
            summary.snapshots, summary.events
        );
        Ok(summary)
    }

    async fn run_snapshots(
        &self,
        session: &SessionHandle,
        presenter: &mut dyn Presenter,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let now = Instant::now();
            let elapsed = now - last;
            last = now;

            let Some(report) = session.tracer().take_report(elapsed) else {
                break;
            };
            let snapshot = Snapshot {
                timestamp: system_time_nanos(),
                report,
                diagnostics: session.diagnostics(),
            };
            presenter
                .snapshot(&snapshot)
                .context("Failed to present snapshot")?;
            summary.snapshots += 1;
            debug!("Presented snapshot {}", summary.snapshots);
        }

        Ok(summary)
    }

    async fn run_stream(
        &self,
        session: &SessionHandle,
        presenter: &mut dyn Presenter,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();
        let Some(ring) = session.tracer().events() else {
            anyhow::bail!("{} has no event stream", session.tracer().kind());
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = ring.poll(self.poll_timeout) => {
                    if let Some(event) = polled {
                        presenter.event(&event).context("Failed to present event")?;
                        summary.events += 1;
                    }
                }
            }
        }

        // Events completed before cancellation are still presented
        let remaining = ring.drain();
        if !remaining.is_empty() {
            debug!("Presenting {} buffered events after cancellation", remaining.len());
        }
        for event in remaining {
            presenter.event(&event).context("Failed to present event")?;
            summary.events += 1;
        }

        Ok(summary)
    }
}
