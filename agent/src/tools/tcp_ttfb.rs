//! tcp_ttfb: handshake latency and time to first byte of outgoing connections
//!
//! Tracks each actively opened socket through CONNECTING -> ESTABLISHED ->
//! COMPLETE. The first segment received on the established socket closes the
//! record and emits one event.

use latscope_shared::utils::{ipv4_from_be, port_from_be};
use latscope_shared::{
    Comm, CorrelationKey, CorrelationState, DiscreteEvent, Outcome, Pid, ProbePoint, RawContext,
    RawEvent, Timestamp,
};

use super::{ExportMode, Tracer};
use crate::config::{Config, ToolKind};
use crate::engine::{correlation_key, Advance, Correlator, Diagnostics, EventRing, StateStore};

const PROBES: &[ProbePoint] = &[
    ProbePoint::TcpV4Connect,
    ProbePoint::TcpSetState,
    ProbePoint::TcpRcvEstablished,
];

const TCP_ESTABLISHED: i32 = 1;
const TCP_CLOSE: i32 = 7;

#[derive(Debug, Clone, Copy)]
struct Handshake {
    state: CorrelationState,
    connect_at: Timestamp,
    established_at: Timestamp,
    /// Network byte order, as read from `sock_common`
    daddr: u32,
    dport: u16,
    pid: Pid,
    comm: Comm,
}

pub struct TcpTtfb {
    correlator: Correlator,
    store: StateStore<CorrelationKey, Handshake>,
    ring: EventRing<DiscreteEvent>,
}

impl TcpTtfb {
    pub fn new(config: &Config) -> Self {
        Self {
            correlator: Correlator::new(),
            store: StateStore::new(config.state_capacity),
            ring: EventRing::new(config.ring_capacity),
        }
    }

    fn connect(&self, key: CorrelationKey, event: &RawEvent) {
        let handshake = Handshake {
            state: CorrelationState::Connecting,
            connect_at: event.timestamp,
            established_at: 0,
            daddr: 0,
            dport: 0,
            pid: event.task.pid,
            comm: event.task.comm,
        };
        self.store.put_start(key, handshake);
    }

    fn established(&self, key: CorrelationKey, event: &RawEvent, daddr: u32, dport: u16) {
        let advanced = self.store.advance(key, |handshake| {
            if !handshake.state.can_advance_to(CorrelationState::Established) {
                return Advance::Reject;
            }
            handshake.state = CorrelationState::Established;
            handshake.established_at = event.timestamp;
            handshake.daddr = daddr;
            handshake.dport = dport;
            Advance::Keep(())
        });

        if advanced.is_none() {
            self.correlator.orphan();
        }
    }

    fn first_byte(&self, key: CorrelationKey, event: &RawEvent) {
        let completed = self.store.advance(key, |handshake| {
            if !handshake.state.can_advance_to(CorrelationState::Complete) {
                return Advance::Reject;
            }
            handshake.state = CorrelationState::Complete;
            Advance::Retire(*handshake)
        });

        let Some(handshake) = completed else {
            self.correlator.orphan();
            return;
        };

        let handshake_ns = self
            .correlator
            .delta(handshake.connect_at, handshake.established_at);
        let ttfb_ns = self.correlator.delta(handshake.connect_at, event.timestamp);
        let since_established_ns = self
            .correlator
            .delta(handshake.established_at, event.timestamp);

        self.ring.push(DiscreteEvent {
            timestamp: event.timestamp,
            key,
            delta_ns: ttfb_ns,
            pid: handshake.pid,
            comm: handshake.comm,
            outcome: Outcome::Handshake {
                daddr: ipv4_from_be(handshake.daddr),
                dport: port_from_be(handshake.dport),
                handshake_ns,
                ttfb_ns,
                since_established_ns,
                state: handshake.state,
            },
        });
    }
}

impl Tracer for TcpTtfb {
    fn kind(&self) -> ToolKind {
        ToolKind::TcpTtfb
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
            RawContext::Connect { .. } => self.connect(key, event),
            RawContext::SetState {
                state: TCP_ESTABLISHED,
                daddr,
                dport,
                ..
            } => self.established(key, event, daddr, dport),
            RawContext::SetState {
                state: TCP_CLOSE, ..
            } => {
                // Connection failed or was torn down before the first byte
                self.store.take_end(&key);
            }
            RawContext::RcvEstablished { .. } => self.first_byte(key, event),
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
