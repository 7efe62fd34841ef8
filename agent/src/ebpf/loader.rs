//! Probe object loader
//!
//! All probe programs live in one eBPF object. Release builds with the
//! `embed-bpf` feature carry it inside the binary; otherwise it is read from
//! `LATSCOPE_EBPF_OBJECT` or from the workspace target directory.

use anyhow::{Context, Result};
use aya::maps::Array;
use aya::Ebpf;
use tracing::{info, warn};

use crate::config::KernelOffsets;

/// Name of the probe binary built by `agent-ebpf`
pub const PROBE_OBJECT: &str = "latscope-probes";

/// Slots of the `OFFSETS` map (must match agent-ebpf/src/common.rs)
pub const OFFSET_SK_RMEM_ALLOC: u32 = 0;
pub const OFFSET_SK_RCVBUF: u32 = 1;
pub const OFFSET_FILE_F_FLAGS: u32 = 2;

/// Load the probe object, hook up eBPF logging and publish kernel offsets
pub fn load_probes(offsets: &KernelOffsets) -> Result<Ebpf> {
    let mut bpf = load_object()?;

    if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
        // Programs without log statements have no log map
        warn!("eBPF logging unavailable: {}", e);
    }

    set_offsets(&mut bpf, offsets).context("Failed to publish kernel offsets")?;
    Ok(bpf)
}

#[cfg(feature = "embed-bpf")]
fn load_object() -> Result<Ebpf> {
    let bytes = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../target/bpfel-unknown-none/release/latscope-probes"
    ));

    let bpf = aya::EbpfLoader::new()
        .load(bytes)
        .context("Failed to load embedded probe object")?;
    info!("Loaded embedded probe object");
    Ok(bpf)
}

#[cfg(not(feature = "embed-bpf"))]
fn load_object() -> Result<Ebpf> {
    let path = object_path();
    info!("Loading probe object from {:?}", path);

    if !path.exists() {
        anyhow::bail!(
            "probe object not found: {:?} (build agent-ebpf or set LATSCOPE_EBPF_OBJECT)",
            path
        );
    }

    aya::EbpfLoader::new()
        .load_file(&path)
        .with_context(|| format!("Failed to load probe object from {:?}", path))
}

/// Where to look for the probe object when it is not embedded
pub fn object_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("LATSCOPE_EBPF_OBJECT") {
        return path.into();
    }

    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("../target/bpfel-unknown-none");
    path.push(profile);
    path.push(PROBE_OBJECT);
    path
}

fn set_offsets(bpf: &mut Ebpf, offsets: &KernelOffsets) -> Result<()> {
    let map = bpf.map_mut("OFFSETS").context("OFFSETS map not found")?;
    let mut slots: Array<_, u32> = Array::try_from(map)?;

    slots.set(OFFSET_SK_RMEM_ALLOC, offsets.sk_rmem_alloc, 0)?;
    slots.set(OFFSET_SK_RCVBUF, offsets.sk_rcvbuf, 0)?;
    slots.set(OFFSET_FILE_F_FLAGS, offsets.file_f_flags, 0)?;
    Ok(())
}
