//! Instrumentation host abstraction
//!
//! The engine does not know how probes are attached. A host resolves a
//! `ProbePoint` to whatever the environment offers (kprobes and tracepoints
//! through aya, or a scripted source in tests).

use latscope_shared::ProbePoint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("instrumentation point {point} not found: {reason}")]
    NotFound { point: ProbePoint, reason: String },

    #[error("not permitted to attach {point}: {reason}")]
    PermissionDenied { point: ProbePoint, reason: String },

    #[error("failed to attach {point}: {reason}")]
    Failed { point: ProbePoint, reason: String },
}

impl AttachError {
    pub fn point(&self) -> ProbePoint {
        match self {
            AttachError::NotFound { point, .. }
            | AttachError::PermissionDenied { point, .. }
            | AttachError::Failed { point, .. } => *point,
        }
    }
}

pub trait InstrumentationHost: Send {
    /// Attach the program serving `point`
    fn attach(&mut self, point: ProbePoint) -> Result<(), AttachError>;

    /// Detach everything attached so far; must be idempotent
    fn detach_all(&mut self);
}
