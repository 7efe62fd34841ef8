//! Time-related utilities
//!
//! Probe timestamps come from `bpf_ktime_get_ns`, i.e. CLOCK_MONOTONIC, and
//! are only ever subtracted from each other. Wall-clock time is used for
//! snapshot stamps.

use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_MICRO: u64 = 1_000;
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub fn nanos_to_micros(ns: u64) -> u64 {
    ns / NANOS_PER_MICRO
}

pub fn nanos_to_millis_f64(ns: u64) -> f64 {
    ns as f64 / NANOS_PER_MILLI as f64
}
