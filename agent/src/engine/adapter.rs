//! Event source adapter
//!
//! Probes hand over fixed-size `ProbeRecord`s. The adapter validates them and
//! turns them into typed `RawEvent`s; anything it cannot decode is counted and
//! dropped so a bad record never reaches a tool.

use latscope_shared::{Comm, ProbePoint, RawContext, RawEvent, ScsiAddr, TaskInfo, TASK_COMM_LEN};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::trace;

/// Record emitted by every probe program (must match agent-ebpf/src/common.rs)
///
/// `args` layout per probe:
/// - return probes: `[ret]`
/// - `vfs_write` entry: `[count, f_flags]`
/// - `block_rq_complete`: `[nr_sector, rwbs as ne u64]`
/// - `task_numa_fault`: `[mem_node, cpu_node, pages]`
/// - scsi dispatch start/done: `[host, channel, id, lun, opcode, result]`
/// - `tcp_recvmsg`: `[sk, rmem_alloc, rcvbuf]`
/// - `__tcp_transmit_skb`: `[sk, skb]`
/// - `tcp_set_state`: `[sk, state, daddr, dport]`
/// - `sched_switch`: `[prev_pid, prev_state, next_pid]`
/// - every other socket or skb probe: `[sk]` or `[skb]`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRecord {
    pub timestamp: u64,
    pub pid_tgid: u64,
    pub probe: u32,
    pub cpu: u32,
    pub comm: [u8; TASK_COMM_LEN],
    pub args: [u64; 6],
}

const ARGS_OFFSET: usize = 40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("probe record truncated: {len} bytes, expected {expected}")]
    Truncated { len: usize, expected: usize },

    #[error("unknown probe id {0}")]
    UnknownProbe(u32),

    #[error("{probe}: null {field} pointer")]
    NullPointer {
        probe: ProbePoint,
        field: &'static str,
    },
}

impl ProbeRecord {
    pub const SIZE: usize = std::mem::size_of::<ProbeRecord>();

    /// Read a record out of a perf buffer sample
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < Self::SIZE {
            return Err(DecodeError::Truncated {
                len: bytes.len(),
                expected: Self::SIZE,
            });
        }

        let mut comm = [0u8; TASK_COMM_LEN];
        comm.copy_from_slice(&bytes[24..24 + TASK_COMM_LEN]);

        let mut args = [0u64; 6];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = read_u64(bytes, ARGS_OFFSET + i * 8);
        }

        Ok(Self {
            timestamp: read_u64(bytes, 0),
            pid_tgid: read_u64(bytes, 8),
            probe: read_u32(bytes, 16),
            cpu: read_u32(bytes, 20),
            comm,
            args,
        })
    }

    /// Serialize in the layout the probes write
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.extend_from_slice(&self.timestamp.to_ne_bytes());
        bytes.extend_from_slice(&self.pid_tgid.to_ne_bytes());
        bytes.extend_from_slice(&self.probe.to_ne_bytes());
        bytes.extend_from_slice(&self.cpu.to_ne_bytes());
        bytes.extend_from_slice(&self.comm);
        for arg in &self.args {
            bytes.extend_from_slice(&arg.to_ne_bytes());
        }
        bytes
    }

    /// Interpret the argument slots for the record's probe
    pub fn decode(&self) -> Result<RawEvent, DecodeError> {
        let probe = ProbePoint::from_u32(self.probe).ok_or(DecodeError::UnknownProbe(self.probe))?;
        let a = &self.args;

        let pointer = |value: u64, field: &'static str| {
            if value == 0 {
                Err(DecodeError::NullPointer { probe, field })
            } else {
                Ok(value)
            }
        };
        let device = ScsiAddr {
            host: a[0] as u32,
            channel: a[1] as u32,
            id: a[2] as u32,
            lun: a[3] as u32,
        };

        let context = match probe {
            ProbePoint::VfsReadReturn
            | ProbePoint::VfsWriteReturn
            | ProbePoint::VfsFsyncReturn
            | ProbePoint::FdatasyncReturn => RawContext::Return { ret: a[0] as i64 },
            ProbePoint::VfsWriteEntry => RawContext::WriteEntry {
                count: a[0],
                file_flags: a[1] as u32,
            },
            ProbePoint::VfsFsyncEntry | ProbePoint::FdatasyncEntry => RawContext::SyncEntry,
            ProbePoint::BlockRqComplete => RawContext::BlockComplete {
                nr_sector: a[0] as u32,
                rwbs: a[1].to_ne_bytes(),
            },
            ProbePoint::TaskNumaFault => RawContext::NumaFault {
                mem_node: a[0] as i32,
                cpu_node: a[1] as i32,
                pages: a[2] as i32,
            },
            ProbePoint::ScsiDispatchCmdStart => RawContext::ScsiStart {
                device,
                opcode: a[4] as u32,
            },
            ProbePoint::ScsiDispatchCmdDone => RawContext::ScsiDone {
                device,
                opcode: a[4] as u32,
                result: a[5] as u32,
            },
            ProbePoint::TcpDataQueue => RawContext::SockQueue {
                sock: pointer(a[0], "sk")?,
            },
            ProbePoint::TcpRecvmsg => RawContext::SockRecv {
                sock: pointer(a[0], "sk")?,
                rmem_alloc: a[1] as u32,
                rcvbuf: a[2] as u32,
            },
            ProbePoint::TcpTransmitSkb => RawContext::SkbTransmit {
                skb: pointer(a[1], "skb")?,
            },
            ProbePoint::DevQueueXmit => RawContext::SkbQueued {
                skb: pointer(a[0], "skb")?,
            },
            ProbePoint::TcpV4Connect => RawContext::Connect {
                sock: pointer(a[0], "sk")?,
            },
            ProbePoint::TcpSetState => RawContext::SetState {
                sock: pointer(a[0], "sk")?,
                state: a[1] as i32,
                daddr: a[2] as u32,
                dport: a[3] as u16,
            },
            ProbePoint::TcpRcvEstablished => RawContext::RcvEstablished {
                sock: pointer(a[0], "sk")?,
            },
            ProbePoint::SchedSwitch => RawContext::SchedSwitch {
                prev_pid: a[0] as u32,
                prev_state: a[1],
                next_pid: a[2] as u32,
            },
        };

        Ok(RawEvent {
            timestamp: self.timestamp,
            cpu_id: self.cpu,
            probe,
            task: TaskInfo::from_pid_tgid(self.pid_tgid, Comm::from_bytes(self.comm)),
            context,
        })
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(buf)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(buf)
}

/// Normalizes perf samples and keeps the drop counters for the ones it rejects
#[derive(Debug, Default)]
pub struct ProbeAdapter {
    decode_dropped: AtomicU64,
    lost: AtomicU64,
}

impl ProbeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&self, bytes: &[u8]) -> Option<RawEvent> {
        match ProbeRecord::from_bytes(bytes).and_then(|record| record.decode()) {
            Ok(event) => Some(event),
            Err(e) => {
                self.decode_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Dropping probe record: {}", e);
                None
            }
        }
    }

    /// Account samples the kernel overwrote before they were read
    pub fn record_lost(&self, count: usize) {
        self.lost.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn decode_dropped(&self) -> u64 {
        self.decode_dropped.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(probe: ProbePoint, args: [u64; 6]) -> ProbeRecord {
        ProbeRecord {
            timestamp: 1_000,
            pid_tgid: (100u64 << 32) | 101,
            probe: probe as u32,
            cpu: 3,
            comm: *Comm::from("dd").as_bytes(),
            args,
        }
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(ProbeRecord::SIZE, 88);
        let r = record(ProbePoint::VfsWriteEntry, [4096, 0o4010000, 0, 0, 0, 0]);
        assert_eq!(r.to_bytes().len(), ProbeRecord::SIZE);
        assert_eq!(ProbeRecord::from_bytes(&r.to_bytes()), Ok(r));
    }

    #[test]
    fn test_decode_write_entry() {
        let event = record(ProbePoint::VfsWriteEntry, [4096, 0x1000, 0, 0, 0, 0])
            .decode()
            .unwrap();

        assert_eq!(event.timestamp, 1_000);
        assert_eq!(event.cpu_id, 3);
        assert_eq!(event.task.pid, 100);
        assert_eq!(event.task.tid, 101);
        assert_eq!(event.task.comm.to_string(), "dd");
        assert_eq!(
            event.context,
            RawContext::WriteEntry {
                count: 4096,
                file_flags: 0x1000
            }
        );
    }

    #[test]
    fn test_decode_negative_return() {
        let event = record(ProbePoint::VfsWriteReturn, [(-5i64) as u64, 0, 0, 0, 0, 0])
            .decode()
            .unwrap();
        assert_eq!(event.context, RawContext::Return { ret: -5 });
    }

    #[test]
    fn test_decode_scsi_done() {
        let event = record(ProbePoint::ScsiDispatchCmdDone, [2, 0, 1, 0, 0x35, 0])
            .decode()
            .unwrap();
        assert_eq!(
            event.context,
            RawContext::ScsiDone {
                device: ScsiAddr {
                    host: 2,
                    channel: 0,
                    id: 1,
                    lun: 0
                },
                opcode: 0x35,
                result: 0
            }
        );
    }

    #[test]
    fn test_decode_block_rwbs() {
        let rwbs = u64::from_ne_bytes(*b"WS\0\0\0\0\0\0");
        let event = record(ProbePoint::BlockRqComplete, [8, rwbs, 0, 0, 0, 0])
            .decode()
            .unwrap();
        match event.context {
            RawContext::BlockComplete { nr_sector, rwbs } => {
                assert_eq!(nr_sector, 8);
                assert_eq!(rwbs[0], b'W');
            }
            other => panic!("unexpected context {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        let mut unknown = record(ProbePoint::SchedSwitch, [0; 6]);
        unknown.probe = 99;
        assert_eq!(unknown.decode(), Err(DecodeError::UnknownProbe(99)));

        let null_sock = record(ProbePoint::TcpV4Connect, [0; 6]);
        assert!(matches!(
            null_sock.decode(),
            Err(DecodeError::NullPointer { field: "sk", .. })
        ));

        assert!(matches!(
            ProbeRecord::from_bytes(&[0u8; 12]),
            Err(DecodeError::Truncated { len: 12, .. })
        ));
    }

    #[test]
    fn test_adapter_counts_drops() {
        let adapter = ProbeAdapter::new();

        let good = record(ProbePoint::VfsFsyncEntry, [0; 6]).to_bytes();
        assert!(adapter.normalize(&good).is_some());
        assert!(adapter.normalize(&good[..40]).is_none());
        assert_eq!(adapter.decode_dropped(), 1);

        adapter.record_lost(5);
        assert_eq!(adapter.lost(), 5);
    }
}
