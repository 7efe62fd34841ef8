//! Event type definitions
//!
//! `RawEvent` is what the event source adapter produces for every probe hit;
//! `DiscreteEvent` is what streaming tools hand to presenters once an
//! operation has been correlated.

use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;

use super::key::{CorrelationKey, CorrelationState};

/// Timestamp in nanoseconds on the kernel monotonic clock
pub type Timestamp = u64;

/// Process ID (thread group id)
pub type Pid = u32;

/// Thread ID
pub type Tid = u32;

/// CPU core number
pub type CpuId = u32;

/// Kernel task name length
pub const TASK_COMM_LEN: usize = 16;

/// Fixed-size task name as captured in the kernel.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Comm([u8; TASK_COMM_LEN]);

impl Comm {
    pub const fn from_bytes(bytes: [u8; TASK_COMM_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TASK_COMM_LEN] {
        &self.0
    }

    /// Name up to the first NUL byte, lossily decoded
    pub fn to_string_lossy(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl From<&str> for Comm {
    fn from(name: &str) -> Self {
        let mut bytes = [0u8; TASK_COMM_LEN];
        let len = name.len().min(TASK_COMM_LEN - 1);
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self(bytes)
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comm({:?})", self.to_string_lossy())
    }
}

impl Serialize for Comm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The task that was running when a probe fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub pid: Pid,
    pub tid: Tid,
    pub comm: Comm,
}

impl TaskInfo {
    /// Split a `bpf_get_current_pid_tgid` value
    pub fn from_pid_tgid(pid_tgid: u64, comm: Comm) -> Self {
        Self {
            pid: (pid_tgid >> 32) as u32,
            tid: pid_tgid as u32,
            comm,
        }
    }

    pub fn pid_tgid(&self) -> u64 {
        ((self.pid as u64) << 32) | self.tid as u64
    }
}

/// The fixed set of instrumentation points the tools attach to.
///
/// Discriminants are part of the record format shared with the eBPF object
/// (must match agent-ebpf/src/common.rs).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProbePoint {
    VfsReadReturn = 1,
    VfsWriteEntry = 2,
    VfsWriteReturn = 3,
    VfsFsyncEntry = 4,
    VfsFsyncReturn = 5,
    FdatasyncEntry = 6,
    FdatasyncReturn = 7,
    BlockRqComplete = 8,
    TaskNumaFault = 9,
    ScsiDispatchCmdStart = 10,
    ScsiDispatchCmdDone = 11,
    TcpDataQueue = 12,
    TcpRecvmsg = 13,
    TcpTransmitSkb = 14,
    DevQueueXmit = 15,
    TcpV4Connect = 16,
    TcpSetState = 17,
    TcpRcvEstablished = 18,
    SchedSwitch = 19,
}

impl ProbePoint {
    pub const ALL: [ProbePoint; 19] = [
        ProbePoint::VfsReadReturn,
        ProbePoint::VfsWriteEntry,
        ProbePoint::VfsWriteReturn,
        ProbePoint::VfsFsyncEntry,
        ProbePoint::VfsFsyncReturn,
        ProbePoint::FdatasyncEntry,
        ProbePoint::FdatasyncReturn,
        ProbePoint::BlockRqComplete,
        ProbePoint::TaskNumaFault,
        ProbePoint::ScsiDispatchCmdStart,
        ProbePoint::ScsiDispatchCmdDone,
        ProbePoint::TcpDataQueue,
        ProbePoint::TcpRecvmsg,
        ProbePoint::TcpTransmitSkb,
        ProbePoint::DevQueueXmit,
        ProbePoint::TcpV4Connect,
        ProbePoint::TcpSetState,
        ProbePoint::TcpRcvEstablished,
        ProbePoint::SchedSwitch,
    ];

    pub fn from_u32(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| *p as u32 == id)
    }

    /// Name of the eBPF program that serves this point
    pub fn program_name(&self) -> &'static str {
        match self {
            ProbePoint::VfsReadReturn => "vfs_read_return",
            ProbePoint::VfsWriteEntry => "vfs_write_entry",
            ProbePoint::VfsWriteReturn => "vfs_write_return",
            ProbePoint::VfsFsyncEntry => "vfs_fsync_entry",
            ProbePoint::VfsFsyncReturn => "vfs_fsync_return",
            ProbePoint::FdatasyncEntry => "fdatasync_entry",
            ProbePoint::FdatasyncReturn => "fdatasync_return",
            ProbePoint::BlockRqComplete => "block_rq_complete",
            ProbePoint::TaskNumaFault => "task_numa_fault",
            ProbePoint::ScsiDispatchCmdStart => "scsi_dispatch_cmd_start",
            ProbePoint::ScsiDispatchCmdDone => "scsi_dispatch_cmd_done",
            ProbePoint::TcpDataQueue => "tcp_data_queue",
            ProbePoint::TcpRecvmsg => "tcp_recvmsg",
            ProbePoint::TcpTransmitSkb => "tcp_transmit_skb",
            ProbePoint::DevQueueXmit => "dev_queue_xmit",
            ProbePoint::TcpV4Connect => "tcp_v4_connect",
            ProbePoint::TcpSetState => "tcp_set_state",
            ProbePoint::TcpRcvEstablished => "tcp_rcv_established",
            ProbePoint::SchedSwitch => "sched_switch",
        }
    }
}

impl fmt::Display for ProbePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program_name())
    }
}

/// SCSI device address as reported by the scsi tracepoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScsiAddr {
    pub host: u32,
    pub channel: u32,
    pub id: u32,
    pub lun: u32,
}

impl fmt::Display for ScsiAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.host, self.channel, self.id, self.lun)
    }
}

/// Typed arguments copied out of the probe context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawContext {
    /// Return value of a kretprobe
    Return { ret: i64 },
    /// `vfs_write(file, buf, count, pos)` entry
    WriteEntry { count: u64, file_flags: u32 },
    /// `vfs_fsync` / `fdatasync` entry
    SyncEntry,
    /// `block:block_rq_complete`
    BlockComplete { nr_sector: u32, rwbs: [u8; 8] },
    /// `task_numa_fault(last_cpupid, mem_node, pages, flags)` on a CPU of `cpu_node`
    NumaFault { mem_node: i32, cpu_node: i32, pages: i32 },
    ScsiStart { device: ScsiAddr, opcode: u32 },
    ScsiDone { device: ScsiAddr, opcode: u32, result: u32 },
    /// `tcp_data_queue(sk, skb)`
    SockQueue { sock: u64 },
    /// `tcp_recvmsg(sk, ...)` with the receive buffer fill level
    SockRecv { sock: u64, rmem_alloc: u32, rcvbuf: u32 },
    /// `__tcp_transmit_skb(sk, skb, ...)`
    SkbTransmit { skb: u64 },
    /// `__dev_queue_xmit(skb, ...)`
    SkbQueued { skb: u64 },
    /// `tcp_v4_connect(sk, ...)`
    Connect { sock: u64 },
    /// `tcp_set_state(sk, state)` with the peer address in network byte order
    SetState { sock: u64, state: i32, daddr: u32, dport: u16 },
    /// `tcp_rcv_established(sk, skb)`
    RcvEstablished { sock: u64 },
    /// `sched:sched_switch`
    SchedSwitch { prev_pid: u32, prev_state: u64, next_pid: u32 },
}

/// A normalized probe hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: Timestamp,
    pub cpu_id: CpuId,
    pub probe: ProbePoint,
    pub task: TaskInfo,
    pub context: RawContext,
}

/// How a streamed operation ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    ScsiCommand {
        device: ScsiAddr,
        opcode: u8,
        result: u32,
    },
    TcpReceive {
        usage_percent: u32,
    },
    TcpTransmit,
    Handshake {
        daddr: Ipv4Addr,
        dport: u16,
        handshake_ns: u64,
        ttfb_ns: u64,
        since_established_ns: u64,
        state: CorrelationState,
    },
}

impl Outcome {
    /// SCSI completions report success through a zero result
    pub fn is_success(&self) -> bool {
        match self {
            Outcome::ScsiCommand { result, .. } => *result == 0,
            _ => true,
        }
    }
}

/// A completed operation in streaming mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscreteEvent {
    /// Completion time
    pub timestamp: Timestamp,
    pub key: CorrelationKey,
    pub delta_ns: u64,
    pub pid: Pid,
    pub comm: Comm,
    pub outcome: Outcome,
}
