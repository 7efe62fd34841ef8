#![no_std]
#![no_main]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_smp_processor_id,
        bpf_ktime_get_ns, bpf_probe_read_kernel,
    },
    macros::{kprobe, kretprobe, map, tracepoint},
    maps::{Array, PerfEventArray},
    programs::{ProbeContext, RetProbeContext, TracePointContext},
    EbpfContext,
};
use aya_ebpf_bindings::helpers::bpf_get_numa_node_id;
use aya_log_ebpf::warn;

mod common;
use common::*;

#[map]
static PROBE_EVENTS: PerfEventArray<ProbeRecord> = PerfEventArray::new(0);

/// Kernel structure offsets, see `OFFSET_*` (0 = unknown)
#[map]
static OFFSETS: Array<u32> = Array::with_max_entries(OFFSET_SLOTS, 0);

#[inline(always)]
fn emit<C: EbpfContext>(ctx: &C, probe: u32, args: [u64; ARG_SLOTS]) {
    let record = ProbeRecord {
        timestamp: unsafe { bpf_ktime_get_ns() },
        pid_tgid: bpf_get_current_pid_tgid(),
        probe,
        cpu: unsafe { bpf_get_smp_processor_id() },
        comm: bpf_get_current_comm().unwrap_or([0u8; TASK_COMM_LEN]),
        args,
    };
    PROBE_EVENTS.output(ctx, &record, 0);
}

#[inline(always)]
fn offset(slot: u32) -> u64 {
    match OFFSETS.get(slot) {
        Some(&v) => v as u64,
        None => 0,
    }
}

/// Read a `u32` field at `base + offset`; unknown offsets read as 0
#[inline(always)]
fn read_u32(base: u64, offset: u64) -> u64 {
    if offset == 0 {
        return 0;
    }
    unsafe { bpf_probe_read_kernel((base + offset) as *const u32) }
        .map(|v| v as u64)
        .unwrap_or(0)
}

#[inline(always)]
fn emit_ret(ctx: &RetProbeContext, probe: u32) -> u32 {
    let ret: i64 = ctx.ret().unwrap_or(0);
    emit(ctx, probe, [ret as u64, 0, 0, 0, 0, 0]);
    0
}

#[inline(always)]
fn emit_arg0(ctx: &ProbeContext, probe: u32) -> u32 {
    let ptr: u64 = ctx.arg(0).unwrap_or(0);
    emit(ctx, probe, [ptr, 0, 0, 0, 0, 0]);
    0
}

// Filesystem

#[kretprobe]
pub fn vfs_read_return(ctx: RetProbeContext) -> u32 {
    emit_ret(&ctx, PROBE_VFS_READ_RETURN)
}

#[kprobe]
pub fn vfs_write_entry(ctx: ProbeContext) -> u32 {
    // vfs_write(struct file *file, const char *buf, size_t count, loff_t *pos)
    let file: u64 = ctx.arg(0).unwrap_or(0);
    let count: u64 = ctx.arg(2).unwrap_or(0);
    let flags = if file == 0 {
        0
    } else {
        read_u32(file, offset(OFFSET_FILE_F_FLAGS))
    };
    emit(&ctx, PROBE_VFS_WRITE_ENTRY, [count, flags, 0, 0, 0, 0]);
    0
}

#[kretprobe]
pub fn vfs_write_return(ctx: RetProbeContext) -> u32 {
    emit_ret(&ctx, PROBE_VFS_WRITE_RETURN)
}

#[kprobe]
pub fn vfs_fsync_entry(ctx: ProbeContext) -> u32 {
    emit(&ctx, PROBE_VFS_FSYNC_ENTRY, [0; ARG_SLOTS]);
    0
}

#[kretprobe]
pub fn vfs_fsync_return(ctx: RetProbeContext) -> u32 {
    emit_ret(&ctx, PROBE_VFS_FSYNC_RETURN)
}

#[kprobe]
pub fn fdatasync_entry(ctx: ProbeContext) -> u32 {
    emit(&ctx, PROBE_FDATASYNC_ENTRY, [0; ARG_SLOTS]);
    0
}

#[kretprobe]
pub fn fdatasync_return(ctx: RetProbeContext) -> u32 {
    emit_ret(&ctx, PROBE_FDATASYNC_RETURN)
}

// Block and SCSI

#[tracepoint]
pub fn block_rq_complete(ctx: TracePointContext) -> u32 {
    try_block_rq_complete(&ctx).unwrap_or_default()
}

fn try_block_rq_complete(ctx: &TracePointContext) -> Result<u32, i64> {
    let nr_sector: u32 = unsafe { ctx.read_at(tp::BLOCK_RQ_COMPLETE_NR_SECTOR)? };
    let rwbs: [u8; 8] = unsafe { ctx.read_at(tp::BLOCK_RQ_COMPLETE_RWBS)? };

    emit(
        ctx,
        PROBE_BLOCK_RQ_COMPLETE,
        [nr_sector as u64, u64::from_ne_bytes(rwbs), 0, 0, 0, 0],
    );
    Ok(0)
}

#[tracepoint]
pub fn scsi_dispatch_cmd_start(ctx: TracePointContext) -> u32 {
    try_scsi_cmd(&ctx, PROBE_SCSI_DISPATCH_CMD_START).unwrap_or_default()
}

#[tracepoint]
pub fn scsi_dispatch_cmd_done(ctx: TracePointContext) -> u32 {
    try_scsi_cmd(&ctx, PROBE_SCSI_DISPATCH_CMD_DONE).unwrap_or_default()
}

fn try_scsi_cmd(ctx: &TracePointContext, probe: u32) -> Result<u32, i64> {
    let host: u32 = unsafe { ctx.read_at(tp::SCSI_HOST_NO)? };
    let channel: u32 = unsafe { ctx.read_at(tp::SCSI_CHANNEL)? };
    let id: u32 = unsafe { ctx.read_at(tp::SCSI_ID)? };
    let lun: u32 = unsafe { ctx.read_at(tp::SCSI_LUN)? };

    let (opcode, result): (u32, u32) = if probe == PROBE_SCSI_DISPATCH_CMD_DONE {
        unsafe {
            (
                ctx.read_at(tp::SCSI_DONE_OPCODE)?,
                ctx.read_at(tp::SCSI_DONE_RESULT)?,
            )
        }
    } else {
        (unsafe { ctx.read_at(tp::SCSI_START_OPCODE)? }, 0)
    };

    emit(
        ctx,
        probe,
        [
            host as u64,
            channel as u64,
            id as u64,
            lun as u64,
            opcode as u64,
            result as u64,
        ],
    );
    Ok(0)
}

// Memory

#[kprobe]
pub fn task_numa_fault(ctx: ProbeContext) -> u32 {
    // task_numa_fault(int last_cpupid, int mem_node, int pages, int flags)
    let mem_node: i32 = ctx.arg(1).unwrap_or(-1);
    let pages: i32 = ctx.arg(2).unwrap_or(0);
    let cpu_node = unsafe { bpf_get_numa_node_id() } as i32;

    emit(
        &ctx,
        PROBE_TASK_NUMA_FAULT,
        [mem_node as u64, cpu_node as u64, pages as u64, 0, 0, 0],
    );
    0
}

// TCP

#[kprobe]
pub fn tcp_data_queue(ctx: ProbeContext) -> u32 {
    emit_arg0(&ctx, PROBE_TCP_DATA_QUEUE)
}

#[kprobe]
pub fn tcp_recvmsg(ctx: ProbeContext) -> u32 {
    let sk: u64 = ctx.arg(0).unwrap_or(0);
    if sk == 0 {
        return 0;
    }
    let rmem_alloc = read_u32(sk, offset(OFFSET_SK_RMEM_ALLOC));
    let rcvbuf = read_u32(sk, offset(OFFSET_SK_RCVBUF));

    emit(&ctx, PROBE_TCP_RECVMSG, [sk, rmem_alloc, rcvbuf, 0, 0, 0]);
    0
}

#[kprobe]
pub fn tcp_transmit_skb(ctx: ProbeContext) -> u32 {
    // __tcp_transmit_skb(struct sock *sk, struct sk_buff *skb, ...)
    let sk: u64 = ctx.arg(0).unwrap_or(0);
    let skb: u64 = ctx.arg(1).unwrap_or(0);
    emit(&ctx, PROBE_TCP_TRANSMIT_SKB, [sk, skb, 0, 0, 0, 0]);
    0
}

#[kprobe]
pub fn dev_queue_xmit(ctx: ProbeContext) -> u32 {
    emit_arg0(&ctx, PROBE_DEV_QUEUE_XMIT)
}

#[kprobe]
pub fn tcp_v4_connect(ctx: ProbeContext) -> u32 {
    emit_arg0(&ctx, PROBE_TCP_V4_CONNECT)
}

#[kprobe]
pub fn tcp_set_state(ctx: ProbeContext) -> u32 {
    try_tcp_set_state(&ctx).unwrap_or_default()
}

fn try_tcp_set_state(ctx: &ProbeContext) -> Result<u32, i64> {
    let sk: u64 = ctx.arg(0).ok_or(1i64)?;
    let state: i32 = ctx.arg(1).ok_or(1i64)?;
    if state != TCP_ESTABLISHED && state != TCP_CLOSE {
        return Ok(0);
    }

    let peer = unsafe {
        bpf_probe_read_kernel((sk + SKC_DADDR) as *const u32).and_then(|daddr| {
            bpf_probe_read_kernel((sk + SKC_DPORT) as *const u16).map(|dport| (daddr, dport))
        })
    };
    let (daddr, dport) = match peer {
        Ok(peer) => peer,
        Err(e) => {
            warn!(ctx, "tcp_set_state: failed to read sock_common: {}", e);
            (0, 0)
        }
    };

    emit(
        ctx,
        PROBE_TCP_SET_STATE,
        [sk, state as u64, daddr as u64, dport as u64, 0, 0],
    );
    Ok(0)
}

#[kprobe]
pub fn tcp_rcv_established(ctx: ProbeContext) -> u32 {
    emit_arg0(&ctx, PROBE_TCP_RCV_ESTABLISHED)
}

// Scheduler

#[tracepoint]
pub fn sched_switch(ctx: TracePointContext) -> u32 {
    try_sched_switch(&ctx).unwrap_or_default()
}

fn try_sched_switch(ctx: &TracePointContext) -> Result<u32, i64> {
    let prev_pid: i32 = unsafe { ctx.read_at(tp::SCHED_SWITCH_PREV_PID)? };
    let prev_state: i64 = unsafe { ctx.read_at(tp::SCHED_SWITCH_PREV_STATE)? };
    let next_pid: i32 = unsafe { ctx.read_at(tp::SCHED_SWITCH_NEXT_PID)? };

    emit(
        ctx,
        PROBE_SCHED_SWITCH,
        [prev_pid as u64, prev_state as u64, next_pid as u64, 0, 0, 0],
    );
    Ok(0)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
