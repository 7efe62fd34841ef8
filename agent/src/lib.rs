//! latscope agent library
//!
//! Correlates start and end events of kernel operations (I/O, scheduling,
//! TCP) into latencies, then aggregates them per interval or streams them as
//! discrete events. The engine in [`engine`] knows nothing about eBPF; the
//! [`ebpf`] module is one instrumentation host feeding it.

pub mod config;
pub mod ebpf;
pub mod engine;
pub mod exporter;
pub mod output;
pub mod session;
pub mod tools;

pub use config::{Config, ToolKind};

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ebpf::EbpfHost;
use exporter::Exporter;
use session::Session;

/// Run one tool until interrupted or until `config.duration` elapses
pub async fn run(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    warn_missing_offsets(&config);

    let tracer = tools::build(&config);
    let mut host = EbpfHost::load(&config.offsets).context("Failed to load probes")?;
    let events = host.take_events()?;

    let mut session = Session::new(tracer, Box::new(host));
    session
        .attach()
        .with_context(|| format!("Failed to start {}", config.tool))?;

    let handle = session.handle();
    let readers = ebpf::spawn_readers(events, handle.clone())?;

    let cancel = CancellationToken::new();
    let stopper = spawn_stopper(cancel.clone(), config.duration);

    let mut presenter = output::presenter(&config)?;
    let exported = Exporter::new(&config)
        .run(&handle, presenter.as_mut(), cancel.clone())
        .await;

    // Cleanup: stop dispatch first, then the readers
    cancel.cancel();
    stopper.abort();
    session.detach();
    for reader in &readers {
        reader.abort();
    }
    for reader in readers {
        let _ = reader.await;
    }

    let diagnostics = session.diagnostics();
    if diagnostics.total_dropped() > 0 {
        warn!(
            "Dropped records: {} pending, {} stats, {} events, {} undecodable, {} lost",
            diagnostics.pending_dropped,
            diagnostics.stats_dropped,
            diagnostics.events_dropped,
            diagnostics.decode_dropped,
            diagnostics.lost_records
        );
    }
    presenter.finish(&diagnostics)?;

    exported.map(|_| ())
}

fn warn_missing_offsets(config: &Config) {
    match config.tool {
        ToolKind::TcpLatency if !config.offsets.socket_buffers_known() => {
            warn!("Socket buffer offsets not set (LATSCOPE_SK_RMEM_ALLOC_OFFSET, LATSCOPE_SK_RCVBUF_OFFSET); RX events will not be reported");
        }
        ToolKind::Writestat if config.offsets.file_f_flags == 0 => {
            warn!("LATSCOPE_FILE_F_FLAGS_OFFSET not set; all writes count as ASYNC");
        }
        _ => {}
    }
}

/// Cancel `cancel` on Ctrl-C or once `duration` elapsed
fn spawn_stopper(cancel: CancellationToken, duration: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(stop_when(cancel, duration, tokio::signal::ctrl_c()))
}

async fn stop_when(
    cancel: CancellationToken,
    duration: Option<Duration>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let signal_failed = tokio::select! {
        interrupted = interrupt => match interrupted {
            Ok(()) => {
                info!("Interrupted, stopping");
                false
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                true
            }
        },
        _ = &mut deadline => {
            info!("Trace duration elapsed");
            false
        }
        _ = cancel.cancelled() => false,
    };

    // Without a signal handler only the deadline or the caller can stop us
    if signal_failed {
        tokio::select! {
            _ = &mut deadline => info!("Trace duration elapsed"),
            _ = cancel.cancelled() => {}
        }
    }

    cancel.cancel();
}
