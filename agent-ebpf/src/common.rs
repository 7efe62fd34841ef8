//! Record layout and identifiers shared with the agent
//!
//! Everything here must match agent/src/engine/adapter.rs, the `ProbePoint`
//! discriminants in shared/src/types/events.rs and the offset slots in
//! agent/src/ebpf/loader.rs.

#![allow(dead_code)]

/// Maximum process name length
pub const TASK_COMM_LEN: usize = 16;

pub const ARG_SLOTS: usize = 6;

/// Fixed-size record written for every probe hit
#[repr(C)]
pub struct ProbeRecord {
    pub timestamp: u64,
    pub pid_tgid: u64,
    pub probe: u32,
    pub cpu: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub args: [u64; ARG_SLOTS],
}

pub const PROBE_VFS_READ_RETURN: u32 = 1;
pub const PROBE_VFS_WRITE_ENTRY: u32 = 2;
pub const PROBE_VFS_WRITE_RETURN: u32 = 3;
pub const PROBE_VFS_FSYNC_ENTRY: u32 = 4;
pub const PROBE_VFS_FSYNC_RETURN: u32 = 5;
pub const PROBE_FDATASYNC_ENTRY: u32 = 6;
pub const PROBE_FDATASYNC_RETURN: u32 = 7;
pub const PROBE_BLOCK_RQ_COMPLETE: u32 = 8;
pub const PROBE_TASK_NUMA_FAULT: u32 = 9;
pub const PROBE_SCSI_DISPATCH_CMD_START: u32 = 10;
pub const PROBE_SCSI_DISPATCH_CMD_DONE: u32 = 11;
pub const PROBE_TCP_DATA_QUEUE: u32 = 12;
pub const PROBE_TCP_RECVMSG: u32 = 13;
pub const PROBE_TCP_TRANSMIT_SKB: u32 = 14;
pub const PROBE_DEV_QUEUE_XMIT: u32 = 15;
pub const PROBE_TCP_V4_CONNECT: u32 = 16;
pub const PROBE_TCP_SET_STATE: u32 = 17;
pub const PROBE_TCP_RCV_ESTABLISHED: u32 = 18;
pub const PROBE_SCHED_SWITCH: u32 = 19;

/// Slots of the OFFSETS map, written by the agent before attaching
pub const OFFSET_SK_RMEM_ALLOC: u32 = 0;
pub const OFFSET_SK_RCVBUF: u32 = 1;
pub const OFFSET_FILE_F_FLAGS: u32 = 2;
pub const OFFSET_SLOTS: u32 = 3;

/// `struct sock_common` layout, stable across kernels
pub const SKC_DADDR: u64 = 0;
pub const SKC_DPORT: u64 = 12;

pub const TCP_ESTABLISHED: i32 = 1;
pub const TCP_CLOSE: i32 = 7;

/// Tracepoint field offsets (from /sys/kernel/tracing/events/*/*/format)
pub mod tp {
    pub const SCHED_SWITCH_PREV_PID: usize = 24;
    pub const SCHED_SWITCH_PREV_STATE: usize = 32;
    pub const SCHED_SWITCH_NEXT_PID: usize = 56;

    pub const BLOCK_RQ_COMPLETE_NR_SECTOR: usize = 24;
    pub const BLOCK_RQ_COMPLETE_RWBS: usize = 32;

    pub const SCSI_HOST_NO: usize = 8;
    pub const SCSI_CHANNEL: usize = 12;
    pub const SCSI_ID: usize = 16;
    pub const SCSI_LUN: usize = 20;
    pub const SCSI_START_OPCODE: usize = 24;
    pub const SCSI_DONE_RESULT: usize = 24;
    pub const SCSI_DONE_OPCODE: usize = 28;
}
