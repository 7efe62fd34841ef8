#![allow(dead_code)]

use latscope_agent::engine::{AttachError, InstrumentationHost, ProbeRecord};
use latscope_shared::{Comm, ProbePoint};
use std::sync::{Arc, Mutex};

/// Probe sample as a perf reader would hand it over
pub fn record(timestamp: u64, cpu: u32, pid: u32, comm: &str, probe: ProbePoint, args: &[u64]) -> Vec<u8> {
    let mut record = ProbeRecord {
        timestamp,
        pid_tgid: ((pid as u64) << 32) | pid as u64,
        probe: probe as u32,
        cpu,
        comm: *Comm::from(comm).as_bytes(),
        args: [0; 6],
    };
    record.args[..args.len()].copy_from_slice(args);
    record.to_bytes()
}

/// Host that records attach calls and can be told to refuse one point
#[derive(Clone, Default)]
pub struct MockHost {
    pub attached: Arc<Mutex<Vec<ProbePoint>>>,
    pub detach_calls: Arc<Mutex<usize>>,
    pub refuse: Option<ProbePoint>,
}

impl MockHost {
    pub fn refusing(point: ProbePoint) -> Self {
        Self {
            refuse: Some(point),
            ..Default::default()
        }
    }

    pub fn attached(&self) -> Vec<ProbePoint> {
        self.attached.lock().unwrap().clone()
    }

    pub fn detach_calls(&self) -> usize {
        *self.detach_calls.lock().unwrap()
    }
}

impl InstrumentationHost for MockHost {
    fn attach(&mut self, point: ProbePoint) -> Result<(), AttachError> {
        if self.refuse == Some(point) {
            return Err(AttachError::PermissionDenied {
                point,
                reason: "Operation not permitted".to_string(),
            });
        }
        self.attached.lock().unwrap().push(point);
        Ok(())
    }

    fn detach_all(&mut self) {
        self.attached.lock().unwrap().clear();
        *self.detach_calls.lock().unwrap() += 1;
    }
}
