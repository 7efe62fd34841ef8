//! ampstat: I/O amplification
//!
//! Compares what applications read and write through the VFS (logical
//! volume) with what the block layer actually transfers (physical volume).

use latscope_shared::{amplification, AggregatedStat, ProbePoint, RawContext, RawEvent, Ratio};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::{mib_per_sec, ExportMode, Report, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{AggregationSink, Diagnostics};

const SECTOR_SIZE: u64 = 512;

const PROBES: &[ProbePoint] = &[
    ProbePoint::VfsReadReturn,
    ProbePoint::VfsWriteReturn,
    ProbePoint::BlockRqComplete,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoClass {
    LogicalRead,
    LogicalWrite,
    PhysicalRead,
    PhysicalWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn classes(self) -> (IoClass, IoClass) {
        match self {
            Direction::Read => (IoClass::LogicalRead, IoClass::PhysicalRead),
            Direction::Write => (IoClass::LogicalWrite, IoClass::PhysicalWrite),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

pub struct Ampstat {
    sink: AggregationSink<IoClass>,
}

impl Ampstat {
    pub fn new(config: &Config) -> Self {
        Self {
            sink: AggregationSink::new(config.shards, config.stat_capacity),
        }
    }

    /// IO class and byte count of an event, if it counts towards either volume
    fn classify(event: &RawEvent) -> Option<(IoClass, u64)> {
        match (event.probe, event.context) {
            (ProbePoint::VfsReadReturn, RawContext::Return { ret }) if ret >= 0 => {
                Some((IoClass::LogicalRead, ret as u64))
            }
            (ProbePoint::VfsWriteReturn, RawContext::Return { ret }) if ret >= 0 => {
                Some((IoClass::LogicalWrite, ret as u64))
            }
            (ProbePoint::BlockRqComplete, RawContext::BlockComplete { nr_sector, rwbs }) => {
                let bytes = nr_sector as u64 * SECTOR_SIZE;
                match rwbs[0] {
                    b'R' => Some((IoClass::PhysicalRead, bytes)),
                    b'W' => Some((IoClass::PhysicalWrite, bytes)),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl Tracer for Ampstat {
    fn kind(&self) -> ToolKind {
        ToolKind::Ampstat
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Snapshot
    }

    fn handle(&self, event: &RawEvent) {
        if let Some((class, bytes)) = Self::classify(event) {
            self.sink.accumulate(event.cpu_id, class, 0, bytes);
        }
    }

    fn take_report(&self, interval: Duration) -> Option<Report> {
        Some(Report::Ampstat(AmpReport::new(
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
pub struct AmpRow {
    pub direction: Direction,
    pub logical_bytes: u64,
    pub physical_bytes: u64,
    pub logical_mib_per_sec: Ratio,
    pub physical_mib_per_sec: Ratio,
    /// Physical over logical volume
    pub amplification: Ratio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmpReport {
    pub interval_ns: u64,
    pub rows: Vec<AmpRow>,
}

impl AmpReport {
    pub fn new(totals: &HashMap<IoClass, AggregatedStat>, interval: Duration) -> Self {
        let bytes = |class: IoClass| totals.get(&class).map_or(0, |s| s.byte_sum);

        let rows = [Direction::Read, Direction::Write]
            .into_iter()
            .map(|direction| {
                let (logical, physical) = direction.classes();
                let logical_bytes = bytes(logical);
                let physical_bytes = bytes(physical);
                AmpRow {
                    direction,
                    logical_bytes,
                    physical_bytes,
                    logical_mib_per_sec: mib_per_sec(logical_bytes, interval),
                    physical_mib_per_sec: mib_per_sec(physical_bytes, interval),
                    amplification: amplification(physical_bytes, logical_bytes),
                }
            })
            .collect();

        Self {
            interval_ns: interval.as_nanos() as u64,
            rows,
        }
    }
}

impl fmt::Display for AmpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>14} {:>14} {:>14}",
            "DIRECTION", "LOGICAL MiB/s", "PHYSICAL MiB/s", "AMPLIFICATION"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<10} {:>14.2} {:>14.2} {:>14.2}",
                row.direction.to_string(),
                row.logical_mib_per_sec,
                row.physical_mib_per_sec,
                row.amplification
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::event;

    fn block(nr_sector: u32, rwbs: &[u8]) -> RawContext {
        let mut flags = [0u8; 8];
        flags[..rwbs.len()].copy_from_slice(rwbs);
        RawContext::BlockComplete {
            nr_sector,
            rwbs: flags,
        }
    }

    #[test]
    fn test_amplification_per_direction() {
        let tool = Ampstat::new(&Config::new(ToolKind::Ampstat));

        tool.handle(&event(1, 0, 10, "db", ProbePoint::VfsWriteReturn, RawContext::Return { ret: 4096 }));
        tool.handle(&event(2, 1, 0, "kworker", ProbePoint::BlockRqComplete, block(16, b"WS")));
        tool.handle(&event(3, 0, 10, "db", ProbePoint::VfsReadReturn, RawContext::Return { ret: -11 }));
        tool.handle(&event(4, 2, 0, "", ProbePoint::BlockRqComplete, block(8, b"R")));
        tool.handle(&event(5, 2, 0, "", ProbePoint::BlockRqComplete, block(8, b"FF")));

        let Some(Report::Ampstat(report)) = tool.take_report(Duration::from_secs(1)) else {
            panic!("ampstat must produce an ampstat report");
        };

        let read = &report.rows[0];
        assert_eq!(read.direction, Direction::Read);
        assert_eq!(read.logical_bytes, 0);
        assert_eq!(read.physical_bytes, 4096);
        assert_eq!(read.amplification, Ratio::Undefined);

        let write = &report.rows[1];
        assert_eq!(write.logical_bytes, 4096);
        assert_eq!(write.physical_bytes, 8192);
        assert_eq!(write.amplification, Ratio::Defined(2.0));
    }

    #[test]
    fn test_report_clears_interval() {
        let tool = Ampstat::new(&Config::new(ToolKind::Ampstat));
        tool.handle(&event(1, 0, 1, "cat", ProbePoint::VfsReadReturn, RawContext::Return { ret: 100 }));

        assert!(tool.take_report(Duration::from_secs(1)).is_some());
        let Some(Report::Ampstat(second)) = tool.take_report(Duration::from_secs(1)) else {
            panic!("ampstat must produce an ampstat report");
        };
        assert!(second
            .rows
            .iter()
            .all(|r| r.logical_bytes == 0 && r.physical_bytes == 0));
    }

    #[test]
    fn test_table_shows_undefined_ratio() {
        let report = AmpReport::new(&HashMap::new(), Duration::from_secs(1));
        let table = report.to_string();
        assert!(table.starts_with("DIRECTION"));
        assert!(table.lines().nth(1).unwrap().trim_end().ends_with('-'));
    }
}
