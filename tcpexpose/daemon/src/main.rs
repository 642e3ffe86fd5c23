//! tcpexpose - TCP connection trace daemon
//!
//! Loads the tcpexpose eBPF probe, correlates connection lifecycle events
//! and serves accumulated per-connection traces over a local socket.
//!
//! ## Usage
//!
//! ```bash
//! # Start the daemon with a compiled probe object
//! sudo ./tcpexpose --ebpf-object path/to/tcpexpose.o
//!
//! # Flush the trace of a connection (either direction works)
//! echo "10.0.0.2 10.0.0.1 80 5000" | socat - UNIX-CONNECT:/run/tcpexpose.sock
//! ```

use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use tcpexpose_common::constants::*;
use tcpexpose_daemon::{
    config::ServiceConfig, events::EventProcessor, loader::ProbeLoader, service::Service,
    stats::StatsSnapshot,
};
use tokio::signal;

/// TCP connection trace daemon using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the compiled eBPF probe object
    #[clap(long)]
    ebpf_object: PathBuf,

    /// Path of the control socket
    #[clap(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Events queued for the correlation actor before new ones are dropped
    #[clap(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    mailbox_capacity: usize,

    /// Progress reporting interval in seconds (0 = disabled)
    #[clap(long, default_value_t = DEFAULT_PROGRESS_INTERVAL_SECS)]
    progress_interval: u64,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting tcpexpose...");
    info!("   Control socket: {:?}", args.socket);
    info!("   Mailbox capacity: {}", args.mailbox_capacity);

    let config = ServiceConfig {
        socket_path: args.socket.clone(),
        mailbox_capacity: args.mailbox_capacity,
        progress_interval_secs: args.progress_interval,
    };

    // Load eBPF program
    let mut loader = ProbeLoader::load(&args.ebpf_object)?;
    loader.attach_kprobes()?;
    let perf_array = loader.take_events_array()?;

    let service = Service::start(&config)?;

    let processor = EventProcessor::new(service.mailbox(), service.stats(), args.verbose);
    processor.spawn_cpu_readers(perf_array)?;
    processor.spawn_progress_reporter(config.progress_interval_secs);

    info!("Tracing connections, press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("Interrupted, shutting down...");

    let report = service.shutdown().await;
    print_summary(&report.stats);
    if !report.store.is_empty() {
        info!(
            "{} connections were still being traced at exit",
            report.store.len()
        );
    }

    // Keep the probes attached until the readers are gone
    drop(loader);

    Ok(())
}

fn print_summary(stats: &StatsSnapshot) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Events applied:");
    info!("    register:     {:>10}", stats.event_type_breakdown.register);
    info!("    unregister:   {:>10}", stats.event_type_breakdown.unregister);
    info!("    publish:      {:>10}", stats.event_type_breakdown.publish);
    info!("    flush:        {:>10}", stats.event_type_breakdown.flush);
    info!("");
    info!("  Samples flushed:    {:>10}", stats.samples_flushed);
    info!("  Empty flushes:      {:>10}", stats.empty_flushes);
    info!("  Live connections:   {:>10}", stats.active_records);
    info!("  Control clients:    {:>10}", stats.client_connections);
    info!("");
    info!("  Dropped:");
    info!("    decode failures:    {:>8}", stats.decode_failures);
    info!("    lost perf samples:  {:>8}", stats.lost_samples);
    info!("    mailbox full:       {:>8}", stats.mailbox_drops);
    info!("    orphan publishes:   {:>8}", stats.orphan_publishes);
    info!("    malformed requests: {:>8}", stats.malformed_requests);
    info!("");
    info!("============================================");
}
