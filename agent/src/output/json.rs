//! JSON-lines output
//!
//! One JSON object per line: `"record": "snapshot"` for aggregated intervals,
//! `"record": "event"` for streamed operations and a final `"summary"` line
//! with the session's drop counters.

use anyhow::{Context, Result};
use latscope_shared::DiscreteEvent;
use serde::Serialize;
use std::io::Write;

use crate::engine::Diagnostics;
use crate::exporter::{Presenter, Snapshot};

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Line<'a> {
    Snapshot(&'a Snapshot),
    Event(&'a DiscreteEvent),
    Summary { diagnostics: &'a Diagnostics },
}

pub struct JsonLinesPresenter<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesPresenter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, line: &Line<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line).context("Failed to serialize record")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().context("Failed to flush output")?;
        Ok(())
    }
}

impl<W: Write + Send> Presenter for JsonLinesPresenter<W> {
    fn snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.write_line(&Line::Snapshot(snapshot))
    }

    fn event(&mut self, event: &DiscreteEvent) -> Result<()> {
        self.write_line(&Line::Event(event))
    }

    fn finish(&mut self, diagnostics: &Diagnostics) -> Result<()> {
        self.write_line(&Line::Summary { diagnostics })
    }
}
