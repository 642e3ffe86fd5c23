//! eBPF program loader
//!
//! Loads the compiled tcpexpose probe and attaches its kprobes.

use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    programs::KProbe,
    Bpf,
};
use log::info;
use std::path::Path;

/// Name of the perf event array carrying event records
pub const EVENTS_MAP: &str = "events";

/// (program name, kernel function) pairs attached as kprobes
pub const KPROBES: &[(&str, &str)] = &[
    // Register on transitions to ESTABLISHED, unregister on transitions out
    ("trace_tcp_set_state", "tcp_set_state"),
    // Counter snapshots for established connections
    ("trace_tcp_rcv_established", "tcp_rcv_established"),
];

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load the eBPF object file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the compiled probe object
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading eBPF object from: {:?}", path);

        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read eBPF object file: {:?}", path))?;
        let ebpf = Bpf::load(&data).context("Failed to load eBPF program")?;

        info!("eBPF program loaded successfully");

        Ok(Self { ebpf })
    }

    /// Attach the lifecycle and counter kprobes
    pub fn attach_kprobes(&mut self) -> Result<()> {
        info!("Attaching kprobes for connection tracking...");

        for &(name, function) in KPROBES {
            let program: &mut KProbe = self
                .ebpf
                .program_mut(name)
                .with_context(|| format!("{} program not found in eBPF object", name))?
                .try_into()
                .with_context(|| format!("Failed to get {} as KProbe", name))?;
            program
                .load()
                .with_context(|| format!("Failed to load {}", name))?;
            program
                .attach(function, 0)
                .with_context(|| format!("Failed to attach {} kprobe", function))?;
            info!("  ✓ Attached {} to {}", name, function);
        }

        info!("All kprobes attached successfully");

        Ok(())
    }

    /// Take the perf event array the probe submits records to
    pub fn take_events_array(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .ebpf
            .take_map(EVENTS_MAP)
            .with_context(|| format!("{} map not found in eBPF object", EVENTS_MAP))?;

        AsyncPerfEventArray::try_from(map)
            .with_context(|| format!("Failed to create AsyncPerfEventArray from {} map", EVENTS_MAP))
    }
}
