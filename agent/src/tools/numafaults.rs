//! numafaults: NUMA fault locality per process

use latscope_shared::{locality_percent, AggregatedStat, Comm, Pid, ProbePoint, RawContext, RawEvent, Ratio};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::{ExportMode, Report, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{AggregationSink, Diagnostics};

const PROBES: &[ProbePoint] = &[ProbePoint::TaskNumaFault];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumaAccess {
    /// Faulting page lives on the node of the faulting CPU
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumaKey {
    pub pid: Pid,
    pub comm: Comm,
    pub access: NumaAccess,
}

pub struct Numafaults {
    sink: AggregationSink<NumaKey>,
}

impl Numafaults {
    pub fn new(config: &Config) -> Self {
        Self {
            sink: AggregationSink::new(config.shards, config.stat_capacity),
        }
    }
}

impl Tracer for Numafaults {
    fn kind(&self) -> ToolKind {
        ToolKind::Numafaults
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Snapshot
    }

    fn handle(&self, event: &RawEvent) {
        let RawContext::NumaFault {
            mem_node,
            cpu_node,
            pages,
        } = event.context
        else {
            return;
        };

        let access = if mem_node == cpu_node {
            NumaAccess::Local
        } else {
            NumaAccess::Remote
        };
        let key = NumaKey {
            pid: event.task.pid,
            comm: event.task.comm,
            access,
        };
        self.sink
            .accumulate(event.cpu_id, key, 0, pages.max(0) as u64);
    }

    fn take_report(&self, interval: Duration) -> Option<Report> {
        Some(Report::Numafaults(NumaReport::new(
            &self.sink.snapshot_and_clear(),
            interval,
        )))
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            stats_dropped: self.sink.dropped(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumaRow {
    pub pid: Pid,
    pub comm: Comm,
    pub local_faults: u64,
    pub remote_faults: u64,
    pub local_pages: u64,
    pub remote_pages: u64,
    pub locality_percent: Ratio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumaReport {
    pub interval_ns: u64,
    pub rows: Vec<NumaRow>,
}

impl NumaReport {
    pub fn new(totals: &HashMap<NumaKey, AggregatedStat>, interval: Duration) -> Self {
        let mut per_task: BTreeMap<(Pid, String), NumaRow> = BTreeMap::new();

        for (key, stat) in totals {
            let row = per_task
                .entry((key.pid, key.comm.to_string()))
                .or_insert_with(|| NumaRow {
                    pid: key.pid,
                    comm: key.comm,
                    local_faults: 0,
                    remote_faults: 0,
                    local_pages: 0,
                    remote_pages: 0,
                    locality_percent: Ratio::Undefined,
                });

            match key.access {
                NumaAccess::Local => {
                    row.local_faults += stat.count;
                    row.local_pages += stat.byte_sum;
                }
                NumaAccess::Remote => {
                    row.remote_faults += stat.count;
                    row.remote_pages += stat.byte_sum;
                }
            }
        }

        let rows = per_task
            .into_values()
            .map(|mut row| {
                row.locality_percent = locality_percent(row.local_faults, row.remote_faults);
                row
            })
            .collect();

        Self {
            interval_ns: interval.as_nanos() as u64,
            rows,
        }
    }
}

impl fmt::Display for NumaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:<16} {:>10} {:>10} {:>10}",
            "PID", "COMM", "LOCAL", "REMOTE", "LOCALITY%"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>8} {:<16} {:>10} {:>10} {:>10.2}",
                row.pid,
                row.comm.to_string(),
                row.local_faults,
                row.remote_faults,
                row.locality_percent
            )?;
        }
        Ok(())
    }
}
