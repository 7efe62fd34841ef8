//! Correlation keys and multi-stage correlation state

use serde::Serialize;
use std::fmt;

use super::events::{Pid, ScsiAddr};

/// Identity that must match between the start and end of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// One in-flight call per thread (`pid_tgid`)
    Thread { pid_tgid: u64 },
    /// Scheduler bookkeeping per task
    Task { pid: Pid },
    /// One outstanding command per device and opcode
    ScsiCommand { device: ScsiAddr, opcode: u32 },
    /// Kernel `struct sock` address
    Socket { sock: u64 },
    /// Kernel `struct sk_buff` address
    Skb { skb: u64 },
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Thread { pid_tgid } => {
                write!(f, "thread {}/{}", pid_tgid >> 32, *pid_tgid as u32)
            }
            CorrelationKey::Task { pid } => write!(f, "task {}", pid),
            CorrelationKey::ScsiCommand { device, opcode } => {
                write!(f, "scsi {} op 0x{:02X}", device, opcode)
            }
            CorrelationKey::Socket { sock } => write!(f, "sock {:#x}", sock),
            CorrelationKey::Skb { skb } => write!(f, "skb {:#x}", skb),
        }
    }
}

/// Progress of a multi-stage correlation.
///
/// `Init` is the state of a key with no pending record. Transitions only move
/// forward; an event that does not match the next expected stage is an orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationState {
    Init,
    Connecting,
    Established,
    Complete,
}

impl CorrelationState {
    /// Whether `next` is the single stage that may follow `self`
    pub fn can_advance_to(self, next: CorrelationState) -> bool {
        matches!(
            (self, next),
            (CorrelationState::Init, CorrelationState::Connecting)
                | (CorrelationState::Connecting, CorrelationState::Established)
                | (CorrelationState::Established, CorrelationState::Complete)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_advances_strictly_forward() {
        use CorrelationState::*;

        assert!(Init.can_advance_to(Connecting));
        assert!(Connecting.can_advance_to(Established));
        assert!(Established.can_advance_to(Complete));

        assert!(!Init.can_advance_to(Established));
        assert!(!Connecting.can_advance_to(Complete));
        assert!(!Established.can_advance_to(Established));
        assert!(!Complete.can_advance_to(Established));
        assert!(!Complete.can_advance_to(Connecting));
    }

    #[test]
    fn test_key_display() {
        let key = CorrelationKey::ScsiCommand {
            device: ScsiAddr {
                host: 0,
                channel: 0,
                id: 1,
                lun: 0,
            },
            opcode: 0x35,
        };
        assert_eq!(key.to_string(), "scsi 0:0:1:0 op 0x35");
        assert_eq!(
            CorrelationKey::Thread {
                pid_tgid: (10u64 << 32) | 11
            }
            .to_string(),
            "thread 10/11"
        );
    }
}
