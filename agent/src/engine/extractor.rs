//! Correlation key extraction

use latscope_shared::{CorrelationKey, RawContext, RawEvent};

/// Derive the key that pairs `event` with the other end of its operation.
///
/// Returns `None` for events that carry no pairing identity (block
/// completions, NUMA faults) and for scheduler switches, which name two tasks
/// at once and are keyed by the scheduler tool itself.
pub fn correlation_key(event: &RawEvent) -> Option<CorrelationKey> {
    match event.context {
        RawContext::Return { .. } | RawContext::WriteEntry { .. } | RawContext::SyncEntry => {
            Some(CorrelationKey::Thread {
                pid_tgid: event.task.pid_tgid(),
            })
        }
        RawContext::ScsiStart { device, opcode } | RawContext::ScsiDone { device, opcode, .. } => {
            Some(CorrelationKey::ScsiCommand { device, opcode })
        }
        RawContext::SockQueue { sock }
        | RawContext::SockRecv { sock, .. }
        | RawContext::Connect { sock }
        | RawContext::SetState { sock, .. }
        | RawContext::RcvEstablished { sock } => Some(CorrelationKey::Socket { sock }),
        RawContext::SkbTransmit { skb } | RawContext::SkbQueued { skb } => {
            Some(CorrelationKey::Skb { skb })
        }
        RawContext::BlockComplete { .. }
        | RawContext::NumaFault { .. }
        | RawContext::SchedSwitch { .. } => None,
    }
}
