//! Aggregated statistics and derived ratios

use serde::{Serialize, Serializer};
use std::fmt;

/// Running totals for one key during one reporting interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedStat {
    pub count: u64,
    pub byte_sum: u64,
    pub latency_sum: u64,
    pub latency_max: u64,
}

impl AggregatedStat {
    /// Account one completed operation
    pub fn record(&mut self, latency_ns: u64, bytes: u64) {
        self.count += 1;
        self.byte_sum = self.byte_sum.saturating_add(bytes);
        self.latency_sum = self.latency_sum.saturating_add(latency_ns);
        self.latency_max = self.latency_max.max(latency_ns);
    }

    /// Fold another shard's totals into this one
    pub fn merge(&mut self, other: &AggregatedStat) {
        self.count += other.count;
        self.byte_sum = self.byte_sum.saturating_add(other.byte_sum);
        self.latency_sum = self.latency_sum.saturating_add(other.latency_sum);
        self.latency_max = self.latency_max.max(other.latency_max);
    }

    pub fn is_zero(&self) -> bool {
        *self == AggregatedStat::default()
    }

    pub fn average_latency(&self) -> Ratio {
        Ratio::of(self.latency_sum as f64, self.count as f64)
    }
}

/// A derived ratio, or an explicit marker when its base is zero.
///
/// Serializes as a number or `null`; displays as `-` when undefined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Defined(f64),
    Undefined,
}

impl Ratio {
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            Ratio::Undefined
        } else {
            Ratio::Defined(numerator / denominator)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Defined(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Ratio::Undefined)
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Ratio::Defined(v) => Ratio::Defined(f(v)),
            Ratio::Undefined => Ratio::Undefined,
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match (self, f.precision()) {
            (Ratio::Defined(v), Some(p)) => format!("{:.*}", p, v),
            (Ratio::Defined(v), None) => v.to_string(),
            (Ratio::Undefined, _) => "-".to_string(),
        };

        // Numbers align right unless asked otherwise
        match (f.width(), f.align()) {
            (Some(w), Some(fmt::Alignment::Left)) => write!(f, "{:<w$}", text),
            (Some(w), Some(fmt::Alignment::Center)) => write!(f, "{:^w$}", text),
            (Some(w), _) => write!(f, "{:>w$}", text),
            (None, _) => f.write_str(&text),
        }
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ratio::Defined(v) => serializer.serialize_f64(*v),
            Ratio::Undefined => serializer.serialize_none(),
        }
    }
}

/// Physical (device) volume over logical (application) volume
pub fn amplification(physical_bytes: u64, logical_bytes: u64) -> Ratio {
    Ratio::of(physical_bytes as f64, logical_bytes as f64)
}

/// Share of local NUMA faults, in percent
pub fn locality_percent(local: u64, remote: u64) -> Ratio {
    Ratio::of(local as f64, local.saturating_add(remote) as f64).map(|r| r * 100.0)
}
