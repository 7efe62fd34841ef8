//! aya-backed instrumentation host

use anyhow::{Context, Result};
use aya::maps::perf::AsyncPerfEventArray;
use aya::maps::MapData;
use aya::programs::kprobe::KProbeLink;
use aya::programs::trace_point::TracePointLink;
use aya::programs::{KProbe, TracePoint};
use aya::Ebpf;
use latscope_shared::ProbePoint;
use std::collections::HashSet;
use std::error::Error;
use tracing::{debug, info};

use super::loader;
use crate::config::KernelOffsets;
use crate::engine::{AttachError, InstrumentationHost};

#[cfg(target_arch = "aarch64")]
const FDATASYNC_SYSCALL: &str = "__arm64_sys_fdatasync";
#[cfg(not(target_arch = "aarch64"))]
const FDATASYNC_SYSCALL: &str = "__x64_sys_fdatasync";

/// Kernel hook serving a probe point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachTarget {
    Kprobe(&'static str),
    Kretprobe(&'static str),
    Tracepoint {
        category: &'static str,
        name: &'static str,
    },
}

pub fn attach_target(point: ProbePoint) -> AttachTarget {
    use AttachTarget::*;

    match point {
        ProbePoint::VfsReadReturn => Kretprobe("vfs_read"),
        ProbePoint::VfsWriteEntry => Kprobe("vfs_write"),
        ProbePoint::VfsWriteReturn => Kretprobe("vfs_write"),
        ProbePoint::VfsFsyncEntry => Kprobe("vfs_fsync"),
        ProbePoint::VfsFsyncReturn => Kretprobe("vfs_fsync"),
        ProbePoint::FdatasyncEntry => Kprobe(FDATASYNC_SYSCALL),
        ProbePoint::FdatasyncReturn => Kretprobe(FDATASYNC_SYSCALL),
        ProbePoint::BlockRqComplete => Tracepoint {
            category: "block",
            name: "block_rq_complete",
        },
        ProbePoint::TaskNumaFault => Kprobe("task_numa_fault"),
        ProbePoint::ScsiDispatchCmdStart => Tracepoint {
            category: "scsi",
            name: "scsi_dispatch_cmd_start",
        },
        ProbePoint::ScsiDispatchCmdDone => Tracepoint {
            category: "scsi",
            name: "scsi_dispatch_cmd_done",
        },
        ProbePoint::TcpDataQueue => Kprobe("tcp_data_queue"),
        ProbePoint::TcpRecvmsg => Kprobe("tcp_recvmsg"),
        ProbePoint::TcpTransmitSkb => Kprobe("__tcp_transmit_skb"),
        ProbePoint::DevQueueXmit => Kprobe("__dev_queue_xmit"),
        ProbePoint::TcpV4Connect => Kprobe("tcp_v4_connect"),
        ProbePoint::TcpSetState => Kprobe("tcp_set_state"),
        ProbePoint::TcpRcvEstablished => Kprobe("tcp_rcv_established"),
        ProbePoint::SchedSwitch => Tracepoint {
            category: "sched",
            name: "sched_switch",
        },
    }
}

enum ProbeLink {
    Kprobe(KProbeLink),
    Tracepoint(TracePointLink),
}

/// Attaches the programs of the probe object; links detach when dropped
pub struct EbpfHost {
    bpf: Ebpf,
    loaded: HashSet<ProbePoint>,
    links: Vec<ProbeLink>,
}

impl EbpfHost {
    pub fn load(offsets: &KernelOffsets) -> Result<Self> {
        let bpf = loader::load_probes(offsets)?;

        for (name, _) in bpf.programs() {
            debug!("Probe program {}", name);
        }

        Ok(Self {
            bpf,
            loaded: HashSet::new(),
            links: Vec::new(),
        })
    }

    /// Take the perf array the probes write `ProbeRecord`s into
    pub fn take_events(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .bpf
            .take_map("PROBE_EVENTS")
            .context("PROBE_EVENTS map not found")?;
        Ok(AsyncPerfEventArray::try_from(map)?)
    }

    fn attach_kprobe(&mut self, point: ProbePoint, function: &str) -> Result<(), AttachError> {
        let needs_load = !self.loaded.contains(&point);
        let program: &mut KProbe = self
            .bpf
            .program_mut(point.program_name())
            .ok_or_else(|| missing_program(point))?
            .try_into()
            .map_err(|e| classify(point, &e))?;

        if needs_load {
            program.load().map_err(|e| classify(point, &e))?;
        }
        let id = program
            .attach(function, 0)
            .map_err(|e| classify(point, &e))?;
        let link = program.take_link(id).map_err(|e| classify(point, &e))?;

        self.loaded.insert(point);
        self.links.push(ProbeLink::Kprobe(link));
        Ok(())
    }

    fn attach_tracepoint(
        &mut self,
        point: ProbePoint,
        category: &str,
        name: &str,
    ) -> Result<(), AttachError> {
        let needs_load = !self.loaded.contains(&point);
        let program: &mut TracePoint = self
            .bpf
            .program_mut(point.program_name())
            .ok_or_else(|| missing_program(point))?
            .try_into()
            .map_err(|e| classify(point, &e))?;

        if needs_load {
            program.load().map_err(|e| classify(point, &e))?;
        }
        let id = program
            .attach(category, name)
            .map_err(|e| classify(point, &e))?;
        let link = program.take_link(id).map_err(|e| classify(point, &e))?;

        self.loaded.insert(point);
        self.links.push(ProbeLink::Tracepoint(link));
        Ok(())
    }
}

impl InstrumentationHost for EbpfHost {
    fn attach(&mut self, point: ProbePoint) -> Result<(), AttachError> {
        match attach_target(point) {
            AttachTarget::Kprobe(function) | AttachTarget::Kretprobe(function) => {
                self.attach_kprobe(point, function)
            }
            AttachTarget::Tracepoint { category, name } => {
                self.attach_tracepoint(point, category, name)
            }
        }
    }

    fn detach_all(&mut self) {
        if self.links.is_empty() {
            return;
        }

        let (kprobes, tracepoints) = self.links.iter().fold((0, 0), |(k, t), link| match link {
            ProbeLink::Kprobe(_) => (k + 1, t),
            ProbeLink::Tracepoint(_) => (k, t + 1),
        });
        info!(
            "Detaching {} kprobes and {} tracepoints",
            kprobes, tracepoints
        );
        self.links.clear();
    }
}

impl Drop for EbpfHost {
    fn drop(&mut self) {
        self.detach_all();
    }
}

fn missing_program(point: ProbePoint) -> AttachError {
    AttachError::NotFound {
        point,
        reason: format!("program {} missing from probe object", point.program_name()),
    }
}

/// Full error chain, outermost first
fn describe(error: &dyn Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn classify(point: ProbePoint, error: &dyn Error) -> AttachError {
    let reason = describe(error);
    let lower = reason.to_lowercase();

    if lower.contains("permission denied") || lower.contains("operation not permitted") {
        AttachError::PermissionDenied { point, reason }
    } else if lower.contains("no such file") || lower.contains("not found") {
        AttachError::NotFound { point, reason }
    } else {
        AttachError::Failed { point, reason }
    }
}
