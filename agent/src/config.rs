//! Configuration types for the tracing agent

use std::time::Duration;
use thiserror::Error;

/// Default capacity of the pending-record store
pub const DEFAULT_STATE_CAPACITY: usize = 10_240;
/// Default key capacity of each aggregation shard
pub const DEFAULT_STAT_CAPACITY: usize = 10_240;
/// Default size of the streaming event ring
pub const DEFAULT_RING_CAPACITY: usize = 4_096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid tool: {0} (expected one of ampstat, numafaults, scsinonrw, tcp_latency, tcp_ttfb, tsastat, writestat)")]
    UnknownTool(String),

    #[error("invalid output format: {0} (expected table or json)")]
    UnknownFormat(String),

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("receive buffer usage threshold must be at most 100%, got {0}")]
    UsageThreshold(u32),
}

/// Which tracer to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Ampstat,
    Numafaults,
    Scsinonrw,
    TcpLatency,
    TcpTtfb,
    Tsastat,
    Writestat,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::Ampstat,
        ToolKind::Numafaults,
        ToolKind::Scsinonrw,
        ToolKind::TcpLatency,
        ToolKind::TcpTtfb,
        ToolKind::Tsastat,
        ToolKind::Writestat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Ampstat => "ampstat",
            ToolKind::Numafaults => "numafaults",
            ToolKind::Scsinonrw => "scsinonrw",
            ToolKind::TcpLatency => "tcp_latency",
            ToolKind::TcpTtfb => "tcp_ttfb",
            ToolKind::Tsastat => "tsastat",
            ToolKind::Writestat => "writestat",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ToolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ToolKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| ConfigError::UnknownTool(s.to_string()))
    }
}

/// How results are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text tables and one line per streamed event
    Table,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "table" | "text" => Ok(OutputFormat::Table),
            "json" | "jsonl" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// Kernel structure offsets that differ between kernel builds.
///
/// A zero offset means "not configured"; the probe then reports the field as
/// zero. Resolve values with `pahole -C sock vmlinux` / `pahole -C file vmlinux`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelOffsets {
    /// `offsetof(struct sock, sk_backlog.rmem_alloc)`
    pub sk_rmem_alloc: u32,
    /// `offsetof(struct sock, sk_rcvbuf)`
    pub sk_rcvbuf: u32,
    /// `offsetof(struct file, f_flags)`
    pub file_f_flags: u32,
}

impl KernelOffsets {
    pub fn from_env() -> Self {
        Self {
            sk_rmem_alloc: env_or("LATSCOPE_SK_RMEM_ALLOC_OFFSET", 0),
            sk_rcvbuf: env_or("LATSCOPE_SK_RCVBUF_OFFSET", 0),
            file_f_flags: env_or("LATSCOPE_FILE_F_FLAGS_OFFSET", 0),
        }
    }

    pub fn socket_buffers_known(&self) -> bool {
        self.sk_rmem_alloc != 0 && self.sk_rcvbuf != 0
    }
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Tracer to run
    pub tool: ToolKind,

    /// Snapshot interval for aggregating tools
    pub interval: Duration,

    /// Stop after this long (None = until interrupted)
    pub duration: Option<Duration>,

    /// How long a streaming poll waits before checking for cancellation
    pub poll_timeout: Duration,

    /// Maximum number of in-flight operations tracked at once
    pub state_capacity: usize,

    /// Maximum number of keys per aggregation shard
    pub stat_capacity: usize,

    /// Streaming ring size
    pub ring_capacity: usize,

    /// Number of aggregation shards (normally one per CPU)
    pub shards: usize,

    /// Streaming tools only emit operations slower than this
    pub latency_threshold: Duration,

    /// tcp_latency RX events require receive buffer usage above this percentage
    pub rx_usage_threshold: u32,

    pub format: OutputFormat,

    /// Output file (stdout otherwise)
    pub output_path: Option<String>,

    pub offsets: KernelOffsets,
}

impl Config {
    /// Configuration for `tool` with defaults, honouring `LATSCOPE_*` overrides
    pub fn new(tool: ToolKind) -> Self {
        Self {
            tool,
            interval: Duration::from_secs(1),
            duration: None,
            poll_timeout: Duration::from_millis(100),
            state_capacity: env_or("LATSCOPE_STATE_CAPACITY", DEFAULT_STATE_CAPACITY),
            stat_capacity: env_or("LATSCOPE_STAT_CAPACITY", DEFAULT_STAT_CAPACITY),
            ring_capacity: env_or("LATSCOPE_RING_CAPACITY", DEFAULT_RING_CAPACITY),
            shards: num_cpus::get(),
            latency_threshold: Duration::from_millis(1),
            rx_usage_threshold: 80,
            format: OutputFormat::Table,
            output_path: None,
            offsets: KernelOffsets::from_env(),
        }
    }

    pub fn latency_threshold_ns(&self) -> u64 {
        self.latency_threshold.as_nanos() as u64
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Zero("interval"));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Zero("poll timeout"));
        }
        if matches!(self.duration, Some(d) if d.is_zero()) {
            return Err(ConfigError::Zero("duration"));
        }
        if self.state_capacity == 0 {
            return Err(ConfigError::Zero("state capacity"));
        }
        if self.stat_capacity == 0 {
            return Err(ConfigError::Zero("stat capacity"));
        }
        if self.ring_capacity == 0 {
            return Err(ConfigError::Zero("ring capacity"));
        }
        if self.shards == 0 {
            return Err(ConfigError::Zero("shard count"));
        }
        if self.rx_usage_threshold > 100 {
            return Err(ConfigError::UsageThreshold(self.rx_usage_threshold));
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
