//! latscope
//!
//! Kernel latency tracer: attaches the probes one tool needs, correlates
//! start and end events and prints interval tables or streamed events.

use anyhow::{Context, Result};
use clap::Parser;
use latscope_agent::config::{Config, OutputFormat, ToolKind};
use latscope_shared::utils::parse_duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "latscope")]
#[command(about = "eBPF-based kernel latency tracer", long_about = None)]
#[command(version)]
struct Args {
    /// Tool to run: ampstat, numafaults, scsinonrw, tcp_latency, tcp_ttfb, tsastat, writestat
    tool: ToolKind,

    /// Snapshot interval of aggregating tools (e.g., "1s", "500ms")
    #[arg(short, long, default_value = "1s", env = "LATSCOPE_INTERVAL")]
    interval: String,

    /// Stop after this long (default: run until Ctrl-C)
    #[arg(short, long, env = "LATSCOPE_DURATION")]
    duration: Option<String>,

    /// Streaming tools only report operations slower than this
    #[arg(short, long, default_value = "1ms", env = "LATSCOPE_THRESHOLD")]
    threshold: String,

    /// tcp_latency: minimum receive buffer usage (percent) for RX events
    #[arg(long, default_value = "80")]
    rx_usage: u32,

    /// Output format: table or json
    #[arg(short, long, default_value = "table", env = "LATSCOPE_FORMAT")]
    format: OutputFormat,

    /// Write output to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Maximum number of in-flight operations tracked
    #[arg(long)]
    state_capacity: Option<usize>,

    /// Maximum number of keys per aggregation shard
    #[arg(long)]
    stat_capacity: Option<usize>,

    /// Streaming event ring size
    #[arg(long)]
    ring_capacity: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_reports()?;

    let args = Args::parse();

    init_tracing(args.verbose)?;

    info!("Starting latscope {}", args.tool);
    info!("Configuration: {:?}", args);

    let config = build_config(&args).context("Invalid arguments")?;

    // eBPF programs need CAP_BPF/CAP_PERFMON; root is the usual way to get them
    if !nix::unistd::Uid::effective().is_root() {
        warn!("Not running as root. Attaching probes will likely fail.");
        warn!("Try: sudo {}", std::env::current_exe()?.display());
    }

    latscope_agent::run(config).await
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = Config::new(args.tool);

    config.interval = parse_duration(&args.interval)?;
    config.duration = args.duration.as_deref().map(parse_duration).transpose()?;
    config.latency_threshold = parse_duration(&args.threshold)?;
    config.rx_usage_threshold = args.rx_usage;
    config.format = args.format;
    config.output_path = args.output.clone();

    if let Some(capacity) = args.state_capacity {
        config.state_capacity = capacity;
    }
    if let Some(capacity) = args.stat_capacity {
        config.stat_capacity = capacity;
    }
    if let Some(capacity) = args.ring_capacity {
        config.ring_capacity = capacity;
    }

    config.validate()?;
    Ok(config)
}

/// Install color-eyre's panic and error report hooks
fn install_panic_reports() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!("Failed to install report hooks: {e}"))
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so table and JSON output stay clean on stdout
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}
