//! scsinonrw: latency of SCSI commands other than READ/WRITE

use latscope_shared::utils::scsi;
use latscope_shared::{CorrelationKey, DiscreteEvent, Outcome, ProbePoint, RawContext, RawEvent, Timestamp};

use super::{ExportMode, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{correlation_key, Correlator, Diagnostics, EventRing, StateStore};

const PROBES: &[ProbePoint] = &[
    ProbePoint::ScsiDispatchCmdStart,
    ProbePoint::ScsiDispatchCmdDone,
];

pub struct Scsinonrw {
    correlator: Correlator,
    store: StateStore<CorrelationKey, Timestamp>,
    ring: EventRing<DiscreteEvent>,
}

impl Scsinonrw {
    pub fn new(config: &Config) -> Self {
        Self {
            correlator: Correlator::new(),
            store: StateStore::new(config.state_capacity),
            ring: EventRing::new(config.ring_capacity),
        }
    }
}

impl Tracer for Scsinonrw {
    fn kind(&self) -> ToolKind {
        ToolKind::Scsinonrw
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Streaming
    }

    fn handle(&self, event: &RawEvent) {
        match event.context {
            RawContext::ScsiStart { opcode, .. } if !scsi::is_read_write(opcode) => {
                if let Some(key) = correlation_key(event) {
                    self.store.put_start(key, event.timestamp);
                }
            }
            RawContext::ScsiDone {
                device,
                opcode,
                result,
            } if !scsi::is_read_write(opcode) => {
                let Some(key) = correlation_key(event) else {
                    return;
                };
                let Some(start) = self.store.take_end(&key) else {
                    self.correlator.orphan();
                    return;
                };

                self.ring.push(DiscreteEvent {
                    timestamp: event.timestamp,
                    key,
                    delta_ns: self.correlator.delta(start, event.timestamp),
                    pid: event.task.pid,
                    comm: event.task.comm,
                    outcome: Outcome::ScsiCommand {
                        device,
                        opcode: opcode as u8,
                        result,
                    },
                });
            }
            _ => {}
        }
    }

    fn events(&self) -> Option<&EventRing<DiscreteEvent>> {
        Some(&self.ring)
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            orphans: self.correlator.orphans(),
            clock_anomalies: self.correlator.clock_anomalies(),
            pending_dropped: self.store.dropped(),
            events_dropped: self.ring.dropped(),
            pending: self.store.len() as u64,
            ..Default::default()
        }
    }
}
