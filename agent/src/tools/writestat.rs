//! writestat: synchronous vs asynchronous write cost per process
//!
//! A `vfs_write` is synchronous when the file was opened with O_SYNC,
//! O_DSYNC or O_DIRECT. Explicit `fsync`/`fdatasync` calls always count as
//! synchronous and carry no bytes.

use latscope_shared::utils::time::NANOS_PER_MILLI;
use latscope_shared::{AggregatedStat, Comm, CorrelationKey, Pid, ProbePoint, RawContext, RawEvent, Ratio, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::{mib_per_sec, ExportMode, Report, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{correlation_key, AggregationSink, Correlator, Diagnostics, StateStore};

const PROBES: &[ProbePoint] = &[
    ProbePoint::VfsWriteEntry,
    ProbePoint::VfsWriteReturn,
    ProbePoint::VfsFsyncEntry,
    ProbePoint::VfsFsyncReturn,
    ProbePoint::FdatasyncEntry,
    ProbePoint::FdatasyncReturn,
];

/// File flags that make a plain write wait for the device
pub const SYNC_FLAGS: u32 = (libc::O_SYNC | libc::O_DSYNC | libc::O_DIRECT) as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteKind {
    Sync,
    Async,
}

impl WriteKind {
    pub fn from_file_flags(flags: u32) -> Self {
        if flags & SYNC_FLAGS != 0 {
            WriteKind::Sync
        } else {
            WriteKind::Async
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Sync => f.write_str("SYNC"),
            WriteKind::Async => f.write_str("ASYNC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteKey {
    pub pid: Pid,
    pub comm: Comm,
    pub kind: WriteKind,
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    start: Timestamp,
    kind: WriteKind,
}

pub struct Writestat {
    correlator: Correlator,
    store: StateStore<CorrelationKey, PendingWrite>,
    sink: AggregationSink<WriteKey>,
}

impl Writestat {
    pub fn new(config: &Config) -> Self {
        Self {
            correlator: Correlator::new(),
            store: StateStore::new(config.state_capacity),
            sink: AggregationSink::new(config.shards, config.stat_capacity),
        }
    }

    fn complete(&self, key: &CorrelationKey, event: &RawEvent, ret: i64) {
        let Some(pending) = self.store.take_end(key) else {
            self.correlator.orphan();
            return;
        };

        // Failed calls release the record without a stat
        if ret < 0 {
            return;
        }

        let latency = self.correlator.delta(pending.start, event.timestamp);
        let bytes = match event.probe {
            ProbePoint::VfsWriteReturn => ret as u64,
            _ => 0,
        };
        let key = WriteKey {
            pid: event.task.pid,
            comm: event.task.comm,
            kind: pending.kind,
        };
        self.sink.accumulate(event.cpu_id, key, latency, bytes);
    }
}

impl Tracer for Writestat {
    fn kind(&self) -> ToolKind {
        ToolKind::Writestat
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Snapshot
    }

    fn handle(&self, event: &RawEvent) {
        if !PROBES.contains(&event.probe) {
            return;
        }
        let Some(key) = correlation_key(event) else {
            return;
        };

        match event.context {
            RawContext::WriteEntry { file_flags, .. } => {
                let pending = PendingWrite {
                    start: event.timestamp,
                    kind: WriteKind::from_file_flags(file_flags),
                };
                self.store.put_start(key, pending);
            }
            RawContext::SyncEntry => {
                let pending = PendingWrite {
                    start: event.timestamp,
                    kind: WriteKind::Sync,
                };
                self.store.put_start(key, pending);
            }
            RawContext::Return { ret } => self.complete(&key, event, ret),
            _ => {}
        }
    }

    fn take_report(&self, interval: Duration) -> Option<Report> {
        Some(Report::Writestat(WriteReport::new(
            &self.sink.snapshot_and_clear(),
            interval,
        )))
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            orphans: self.correlator.orphans(),
            clock_anomalies: self.correlator.clock_anomalies(),
            pending_dropped: self.store.dropped(),
            stats_dropped: self.sink.dropped(),
            pending: self.store.len() as u64,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteRow {
    pub pid: Pid,
    pub comm: Comm,
    pub kind: WriteKind,
    pub calls: u64,
    pub bytes: u64,
    pub mib_per_sec: Ratio,
    pub avg_latency_ns: Ratio,
    pub max_latency_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReport {
    pub interval_ns: u64,
    pub rows: Vec<WriteRow>,
}

impl WriteReport {
    pub fn new(totals: &HashMap<WriteKey, AggregatedStat>, interval: Duration) -> Self {
        let mut rows: Vec<WriteRow> = totals
            .iter()
            .map(|(key, stat)| WriteRow {
                pid: key.pid,
                comm: key.comm,
                kind: key.kind,
                calls: stat.count,
                bytes: stat.byte_sum,
                mib_per_sec: mib_per_sec(stat.byte_sum, interval),
                avg_latency_ns: stat.average_latency(),
                max_latency_ns: stat.latency_max,
            })
            .collect();
        rows.sort_by(|a, b| (a.pid, a.kind).cmp(&(b.pid, b.kind)));

        Self {
            interval_ns: interval.as_nanos() as u64,
            rows,
        }
    }
}

impl fmt::Display for WriteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:<16} {:<6} {:>8} {:>10} {:>12} {:>12}",
            "PID", "COMM", "KIND", "CALLS", "MiB/s", "AVG(ms)", "MAX(ms)"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>8} {:<16} {:<6} {:>8} {:>10.2} {:>12.3} {:>12.3}",
                row.pid,
                row.comm.to_string(),
                row.kind.to_string(),
                row.calls,
                row.mib_per_sec,
                row.avg_latency_ns.map(|ns| ns / NANOS_PER_MILLI as f64),
                row.max_latency_ns as f64 / NANOS_PER_MILLI as f64
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::event;

    fn report(tool: &Writestat) -> WriteReport {
        match tool.take_report(Duration::from_secs(1)) {
            Some(Report::Writestat(report)) => report,
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn test_sync_flag_classification() {
        assert_eq!(WriteKind::from_file_flags(0), WriteKind::Async);
        assert_eq!(WriteKind::from_file_flags(libc::O_APPEND as u32), WriteKind::Async);
        assert_eq!(WriteKind::from_file_flags(libc::O_DSYNC as u32), WriteKind::Sync);
        assert_eq!(WriteKind::from_file_flags(libc::O_SYNC as u32), WriteKind::Sync);
        assert_eq!(WriteKind::from_file_flags(libc::O_DIRECT as u32), WriteKind::Sync);
    }

    #[test]
    fn test_o_sync_write_is_sync() {
        let tool = Writestat::new(&Config::new(ToolKind::Writestat));
        let entry = RawContext::WriteEntry {
            count: 512,
            file_flags: libc::O_SYNC as u32,
        };

        tool.handle(&event(100, 0, 7, "pg", ProbePoint::VfsWriteEntry, entry));
        tool.handle(&event(900, 0, 7, "pg", ProbePoint::VfsWriteReturn, RawContext::Return { ret: 512 }));

        let rows = report(&tool).rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, WriteKind::Sync);
        assert_eq!(rows[0].bytes, 512);
        assert_eq!(rows[0].max_latency_ns, 800);
    }

    #[test]
    fn test_failed_write_releases_record() {
        let tool = Writestat::new(&Config::new(ToolKind::Writestat));
        let entry = RawContext::WriteEntry {
            count: 512,
            file_flags: 0,
        };

        tool.handle(&event(100, 0, 7, "pg", ProbePoint::VfsWriteEntry, entry));
        tool.handle(&event(200, 0, 7, "pg", ProbePoint::VfsWriteReturn, RawContext::Return { ret: -28 }));

        assert!(report(&tool).rows.is_empty());
        assert_eq!(tool.diagnostics().pending, 0);
        assert_eq!(tool.diagnostics().orphans, 0);
    }

    #[test]
    fn test_fdatasync_counts_as_sync_without_bytes() {
        let tool = Writestat::new(&Config::new(ToolKind::Writestat));

        tool.handle(&event(0, 2, 9, "redis", ProbePoint::FdatasyncEntry, RawContext::SyncEntry));
        tool.handle(&event(5_000, 2, 9, "redis", ProbePoint::FdatasyncReturn, RawContext::Return { ret: 0 }));

        let rows = report(&tool).rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, WriteKind::Sync);
        assert_eq!(rows[0].bytes, 0);
        assert_eq!(rows[0].avg_latency_ns, Ratio::Defined(5_000.0));
    }

    #[test]
    fn test_return_without_entry_is_orphan() {
        let tool = Writestat::new(&Config::new(ToolKind::Writestat));
        tool.handle(&event(10, 0, 3, "sh", ProbePoint::VfsWriteReturn, RawContext::Return { ret: 4 }));

        assert!(report(&tool).rows.is_empty());
        assert_eq!(tool.diagnostics().orphans, 1);
    }

    #[test]
    fn test_table_rendering() {
        let tool = Writestat::new(&Config::new(ToolKind::Writestat));
        tool.handle(&event(0, 0, 3, "sh", ProbePoint::VfsFsyncEntry, RawContext::SyncEntry));
        tool.handle(&event(2_000_000, 0, 3, "sh", ProbePoint::VfsFsyncReturn, RawContext::Return { ret: 0 }));

        let table = report(&tool).to_string();
        let line = table.lines().nth(1).unwrap();
        assert!(line.contains("SYNC"));
        assert!(line.contains("2.000"));
    }
}
