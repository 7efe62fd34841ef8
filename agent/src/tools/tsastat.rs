//! tsastat: thread state analysis
//!
//! Charges the time each task spends switched out to the state it was in when
//! it left the CPU: still runnable (preempted), blocked on disk, or sleeping.

use latscope_shared::utils::time::NANOS_PER_MILLI;
use latscope_shared::{AggregatedStat, CorrelationKey, Pid, ProbePoint, RawContext, RawEvent, Timestamp};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use super::{ExportMode, Report, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{AggregationSink, Correlator, Diagnostics, StateStore};

const PROBES: &[ProbePoint] = &[ProbePoint::SchedSwitch];

const TASK_RUNNING: u64 = 0;
const TASK_UNINTERRUPTIBLE: u64 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    /// Preempted while runnable, waiting for a CPU
    Run,
    Sleep,
    /// Uninterruptible wait, usually disk I/O
    Disk,
}

impl ThreadState {
    /// Classify a `prev_state` value from `sched_switch`
    pub fn from_prev_state(prev_state: u64) -> Self {
        if prev_state == TASK_RUNNING {
            ThreadState::Run
        } else if prev_state & TASK_UNINTERRUPTIBLE != 0 {
            ThreadState::Disk
        } else {
            ThreadState::Sleep
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadStateKey {
    pub pid: Pid,
    pub state: ThreadState,
}

#[derive(Debug, Clone, Copy)]
struct SwitchedOut {
    at: Timestamp,
    state: ThreadState,
}

pub struct Tsastat {
    correlator: Correlator,
    store: StateStore<CorrelationKey, SwitchedOut>,
    sink: AggregationSink<ThreadStateKey>,
}

impl Tsastat {
    pub fn new(config: &Config) -> Self {
        Self {
            correlator: Correlator::new(),
            store: StateStore::new(config.state_capacity),
            sink: AggregationSink::new(config.shards, config.stat_capacity),
        }
    }
}

impl Tracer for Tsastat {
    fn kind(&self) -> ToolKind {
        ToolKind::Tsastat
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Snapshot
    }

    fn handle(&self, event: &RawEvent) {
        let RawContext::SchedSwitch {
            prev_pid,
            prev_state,
            next_pid,
        } = event.context
        else {
            return;
        };

        // pid 0 is the per-CPU idle task; every CPU has one, so it can't be paired
        if prev_pid != 0 {
            self.store.put_start(
                CorrelationKey::Task { pid: prev_pid },
                SwitchedOut {
                    at: event.timestamp,
                    state: ThreadState::from_prev_state(prev_state),
                },
            );
        }

        if next_pid == 0 {
            return;
        }

        match self.store.take_end(&CorrelationKey::Task { pid: next_pid }) {
            Some(out) => {
                let off_cpu = self.correlator.delta(out.at, event.timestamp);
                let key = ThreadStateKey {
                    pid: next_pid,
                    state: out.state,
                };
                self.sink.accumulate(event.cpu_id, key, off_cpu, 0);
            }
            None => self.correlator.orphan(),
        }
    }

    fn take_report(&self, interval: Duration) -> Option<Report> {
        Some(Report::Tsastat(ThreadStateReport::new(
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadStateRow {
    pub pid: Pid,
    pub run_ms: u64,
    pub sleep_ms: u64,
    pub disk_ms: u64,
}

impl ThreadStateRow {
    fn is_zero(&self) -> bool {
        self.run_ms == 0 && self.sleep_ms == 0 && self.disk_ms == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadStateReport {
    pub interval_ns: u64,
    pub rows: Vec<ThreadStateRow>,
}

impl ThreadStateReport {
    /// Rows per pid in whole milliseconds; rows that round to zero are elided
    pub fn new(totals: &HashMap<ThreadStateKey, AggregatedStat>, interval: Duration) -> Self {
        let mut per_pid: BTreeMap<Pid, [u64; 3]> = BTreeMap::new();
        for (key, stat) in totals {
            let slot = match key.state {
                ThreadState::Run => 0,
                ThreadState::Sleep => 1,
                ThreadState::Disk => 2,
            };
            per_pid.entry(key.pid).or_default()[slot] += stat.latency_sum;
        }

        let rows = per_pid
            .into_iter()
            .map(|(pid, [run, sleep, disk])| ThreadStateRow {
                pid,
                run_ms: run / NANOS_PER_MILLI,
                sleep_ms: sleep / NANOS_PER_MILLI,
                disk_ms: disk / NANOS_PER_MILLI,
            })
            .filter(|row| !row.is_zero())
            .collect();

        Self {
            interval_ns: interval.as_nanos() as u64,
            rows,
        }
    }
}

impl fmt::Display for ThreadStateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>8} {:>10} {:>10} {:>10}",
            "PID", "RUN(ms)", "SLEEP(ms)", "DISK(ms)"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:>8} {:>10} {:>10} {:>10}",
                row.pid, row.run_ms, row.sleep_ms, row.disk_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::event;

    const MS: u64 = NANOS_PER_MILLI;

    fn switch(prev_pid: u32, prev_state: u64, next_pid: u32) -> RawContext {
        RawContext::SchedSwitch {
            prev_pid,
            prev_state,
            next_pid,
        }
    }

    #[test]
    fn test_prev_state_classification() {
        assert_eq!(ThreadState::from_prev_state(0), ThreadState::Run);
        assert_eq!(ThreadState::from_prev_state(0x1), ThreadState::Sleep);
        assert_eq!(ThreadState::from_prev_state(0x2), ThreadState::Disk);
        assert_eq!(ThreadState::from_prev_state(0x402), ThreadState::Disk);
        assert_eq!(ThreadState::from_prev_state(0x80), ThreadState::Sleep);
    }

    #[test]
    fn test_off_cpu_time_by_state() {
        let tool = Tsastat::new(&Config::new(ToolKind::Tsastat));

        // 10 leaves runnable, back 3ms later
        tool.handle(&event(0, 0, 10, "a", ProbePoint::SchedSwitch, switch(10, 0, 20)));
        tool.handle(&event(3 * MS, 0, 20, "b", ProbePoint::SchedSwitch, switch(20, 2, 10)));
        // 20 blocked on disk for 5ms
        tool.handle(&event(8 * MS, 1, 30, "c", ProbePoint::SchedSwitch, switch(30, 1, 20)));
        // 30 sleeps 2ms
        tool.handle(&event(10 * MS, 1, 20, "b", ProbePoint::SchedSwitch, switch(20, 1, 30)));

        let Some(Report::Tsastat(report)) = tool.take_report(Duration::from_secs(1)) else {
            panic!("tsastat must produce a tsastat report");
        };

        assert_eq!(
            report.rows,
            vec![
                ThreadStateRow {
                    pid: 10,
                    run_ms: 3,
                    ..Default::default()
                },
                ThreadStateRow {
                    pid: 20,
                    disk_ms: 5,
                    ..Default::default()
                },
                ThreadStateRow {
                    pid: 30,
                    sleep_ms: 2,
                    ..Default::default()
                },
            ]
        );

        // First switch-in of 20 had no prior switch-out
        assert_eq!(tool.diagnostics().orphans, 1);
        // Only 20 is switched out at the end
        assert_eq!(tool.diagnostics().pending, 1);
    }

    #[test]
    fn test_sub_millisecond_rows_are_elided() {
        let tool = Tsastat::new(&Config::new(ToolKind::Tsastat));
        tool.handle(&event(0, 0, 5, "a", ProbePoint::SchedSwitch, switch(5, 1, 0)));
        tool.handle(&event(MS / 2, 0, 0, "swapper", ProbePoint::SchedSwitch, switch(0, 0, 5)));

        let Some(Report::Tsastat(report)) = tool.take_report(Duration::from_secs(1)) else {
            panic!("tsastat must produce a tsastat report");
        };
        assert!(report.rows.is_empty());
    }

    #[test]
    fn test_idle_task_is_not_tracked() {
        let tool = Tsastat::new(&Config::new(ToolKind::Tsastat));
        tool.handle(&event(0, 0, 0, "swapper/0", ProbePoint::SchedSwitch, switch(0, 0, 0)));
        assert_eq!(tool.diagnostics().pending, 0);
        assert_eq!(tool.diagnostics().orphans, 0);
    }
}
