//! tcp_latency: slow hand-offs inside the TCP stack
//!
//! RX: time between a segment being queued on the socket (`tcp_data_queue`)
//! and the application reading it (`tcp_recvmsg`), reported only while the
//! receive buffer is nearly full. TX: time between `__tcp_transmit_skb` and
//! the skb reaching the device queue.

use latscope_shared::{CorrelationKey, DiscreteEvent, Outcome, ProbePoint, RawContext, RawEvent, Timestamp};

use super::{ExportMode, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{correlation_key, Correlator, Diagnostics, EventRing, StateStore};

const PROBES: &[ProbePoint] = &[
    ProbePoint::TcpDataQueue,
    ProbePoint::TcpRecvmsg,
    ProbePoint::TcpTransmitSkb,
    ProbePoint::DevQueueXmit,
];

/// Receive buffer fill level in percent; `None` when the buffer size is unknown
pub fn rx_usage_percent(rmem_alloc: u32, rcvbuf: u32) -> Option<u32> {
    if rcvbuf == 0 {
        return None;
    }
    Some((rmem_alloc as u64 * 100 / rcvbuf as u64) as u32)
}

pub struct TcpLatency {
    threshold_ns: u64,
    usage_threshold: u32,
    correlator: Correlator,
    store: StateStore<CorrelationKey, Timestamp>,
    ring: EventRing<DiscreteEvent>,
}

impl TcpLatency {
    pub fn new(config: &Config) -> Self {
        Self {
            threshold_ns: config.latency_threshold_ns(),
            usage_threshold: config.rx_usage_threshold,
            correlator: Correlator::new(),
            store: StateStore::new(config.state_capacity),
            ring: EventRing::new(config.ring_capacity),
        }
    }

    fn finish(&self, key: CorrelationKey, event: &RawEvent) -> Option<u64> {
        match self.store.take_end(&key) {
            Some(start) => Some(self.correlator.delta(start, event.timestamp)),
            None => {
                self.correlator.orphan();
                None
            }
        }
    }

    fn emit(&self, key: CorrelationKey, event: &RawEvent, delta_ns: u64, outcome: Outcome) {
        self.ring.push(DiscreteEvent {
            timestamp: event.timestamp,
            key,
            delta_ns,
            pid: event.task.pid,
            comm: event.task.comm,
            outcome,
        });
    }
}

impl Tracer for TcpLatency {
    fn kind(&self) -> ToolKind {
        ToolKind::TcpLatency
    }

    fn probes(&self) -> &'static [ProbePoint] {
        PROBES
    }

    fn mode(&self) -> ExportMode {
        ExportMode::Streaming
    }

    fn handle(&self, event: &RawEvent) {
        let Some(key) = correlation_key(event) else {
            return;
        };

        match event.context {
            RawContext::SockQueue { .. } | RawContext::SkbTransmit { .. } => {
                self.store.put_start(key, event.timestamp);
            }
            RawContext::SockRecv {
                rmem_alloc, rcvbuf, ..
            } => {
                let Some(delta) = self.finish(key, event) else {
                    return;
                };
                let Some(usage) = rx_usage_percent(rmem_alloc, rcvbuf) else {
                    return;
                };
                if usage > self.usage_threshold && delta > self.threshold_ns {
                    let outcome = Outcome::TcpReceive {
                        usage_percent: usage,
                    };
                    self.emit(key, event, delta, outcome);
                }
            }
            RawContext::SkbQueued { .. } => {
                let Some(delta) = self.finish(key, event) else {
                    return;
                };
                if delta > self.threshold_ns {
                    self.emit(key, event, delta, Outcome::TcpTransmit);
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::event;

    const SK: u64 = 0xffff_8881_0000_0a00;
    const SKB: u64 = 0xffff_8881_0200_0100;
    const MS: u64 = 1_000_000;

    fn tool() -> TcpLatency {
        TcpLatency::new(&Config::new(ToolKind::TcpLatency))
    }

    fn recv(rmem_alloc: u32, rcvbuf: u32) -> RawContext {
        RawContext::SockRecv {
            sock: SK,
            rmem_alloc,
            rcvbuf,
        }
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(rx_usage_percent(90, 100), Some(90));
        assert_eq!(rx_usage_percent(u32::MAX, u32::MAX), Some(100));
        assert_eq!(rx_usage_percent(10, 0), None);
    }

    #[test]
    fn test_slow_rx_with_full_buffer_is_reported() {
        let tool = tool();

        tool.handle(&event(0, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(3 * MS, 1, 55, "nginx", ProbePoint::TcpRecvmsg, recv(900, 1000)));

        let record = tool.events().unwrap().try_pop().unwrap();
        assert_eq!(record.delta_ns, 3 * MS);
        assert_eq!(record.key, CorrelationKey::Socket { sock: SK });
        assert_eq!(record.outcome, Outcome::TcpReceive { usage_percent: 90 });
        assert_eq!(record.comm.to_string(), "nginx");
    }

    #[test]
    fn test_rx_filters() {
        let tool = tool();

        // Buffer not under pressure
        tool.handle(&event(0, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(5 * MS, 0, 1, "a", ProbePoint::TcpRecvmsg, recv(100, 1000)));
        // Fast read
        tool.handle(&event(6 * MS, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(6 * MS + 10, 0, 1, "a", ProbePoint::TcpRecvmsg, recv(990, 1000)));
        // Unknown buffer size
        tool.handle(&event(7 * MS, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(20 * MS, 0, 1, "a", ProbePoint::TcpRecvmsg, recv(990, 0)));

        assert!(tool.events().unwrap().is_empty());
        // Every record was released
        assert_eq!(tool.diagnostics().pending, 0);
    }

    #[test]
    fn test_slow_tx_is_reported() {
        let tool = tool();

        tool.handle(&event(0, 2, 8, "curl", ProbePoint::TcpTransmitSkb, RawContext::SkbTransmit { skb: SKB }));
        tool.handle(&event(2 * MS, 2, 8, "curl", ProbePoint::DevQueueXmit, RawContext::SkbQueued { skb: SKB }));
        tool.handle(&event(3 * MS, 2, 8, "curl", ProbePoint::TcpTransmitSkb, RawContext::SkbTransmit { skb: SKB }));
        tool.handle(&event(3 * MS + 500, 2, 8, "curl", ProbePoint::DevQueueXmit, RawContext::SkbQueued { skb: SKB }));

        let ring = tool.events().unwrap();
        assert_eq!(ring.len(), 1);
        let record = ring.try_pop().unwrap();
        assert_eq!(record.outcome, Outcome::TcpTransmit);
        assert_eq!(record.delta_ns, 2 * MS);
    }

    #[test]
    fn test_rx_last_queue_wins() {
        let tool = tool();

        tool.handle(&event(0, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(4 * MS, 0, 0, "", ProbePoint::TcpDataQueue, RawContext::SockQueue { sock: SK }));
        tool.handle(&event(6 * MS, 0, 1, "a", ProbePoint::TcpRecvmsg, recv(950, 1000)));

        assert_eq!(tool.events().unwrap().try_pop().unwrap().delta_ns, 2 * MS);
    }
}
