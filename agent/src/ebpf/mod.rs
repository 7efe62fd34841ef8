//! eBPF program management

pub mod host;
pub mod loader;
pub mod reader;

pub use host::{attach_target, AttachTarget, EbpfHost};
pub use reader::spawn_readers;
