//! Per-CPU perf buffer readers

use anyhow::{anyhow, Result};
use aya::maps::perf::AsyncPerfEventArray;
use aya::maps::MapData;
use aya::util::online_cpus;
use bytes::BytesMut;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::ProbeRecord;
use crate::session::SessionHandle;

/// Buffers handed to each `read_events` call
const READ_BATCH: usize = 16;

/// Spawn one reader task per online CPU feeding `session`.
///
/// Readers run until aborted or until their buffer fails.
pub fn spawn_readers(
    mut events: AsyncPerfEventArray<MapData>,
    session: SessionHandle,
) -> Result<Vec<JoinHandle<()>>> {
    let cpus = online_cpus().map_err(|(msg, e)| anyhow!("{}: {}", msg, e))?;
    let mut handles = Vec::with_capacity(cpus.len());

    for cpu_id in cpus {
        let mut buf = events.open(cpu_id, None)?;
        let session = session.clone();

        handles.push(tokio::spawn(async move {
            let mut buffers = (0..READ_BATCH)
                .map(|_| BytesMut::with_capacity(ProbeRecord::SIZE + 64))
                .collect::<Vec<_>>();

            loop {
                match buf.read_events(&mut buffers).await {
                    Ok(events) => {
                        session.record_lost(events.lost);
                        for sample in buffers.iter().take(events.read) {
                            session.ingest(sample);
                        }
                    }
                    Err(e) => {
                        warn!("Perf reader on CPU {} stopped: {}", cpu_id, e);
                        break;
                    }
                }
            }
        }));
    }

    debug!("Spawned {} perf readers", handles.len());
    Ok(handles)
}
