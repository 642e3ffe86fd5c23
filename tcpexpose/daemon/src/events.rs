//! Event processing from eBPF perf buffers
//!
//! Reads event records from the per-CPU perf buffers, decodes them and posts
//! the resulting lifecycle events to the correlation actor's mailbox.

use crate::{
    actor::MailboxSender,
    decoder::decode_event,
    stats::ServiceStats,
    types::{kernel::constants::*, LifecycleEvent},
};
use anyhow::Result;
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData},
    util::online_cpus,
};
use bytes::BytesMut;
use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::time::interval;

/// Event processor that reads from perf buffers
#[derive(Clone)]
pub struct EventProcessor {
    mailbox: MailboxSender,
    stats: Arc<ServiceStats>,
    verbose: bool,
}

impl EventProcessor {
    /// Create a new event processor
    ///
    /// # Arguments
    ///
    /// * `mailbox` - Mailbox of the correlation actor
    /// * `stats` - Shared service counters
    /// * `verbose` - Log every decoded event
    pub fn new(mailbox: MailboxSender, stats: Arc<ServiceStats>, verbose: bool) -> Self {
        Self {
            mailbox,
            stats,
            verbose,
        }
    }

    /// Decode one raw record and post it to the mailbox
    ///
    /// # Returns
    ///
    /// `true` if the event reached the mailbox
    pub fn ingest(&self, data: &[u8]) -> bool {
        let event = match decode_event(data) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_decode_failure();
                debug!("Dropping event record: {}", e);
                return false;
            }
        };

        if self.verbose {
            log_event(&event);
        }

        self.mailbox.post(event)
    }

    /// Spawn per-CPU event readers
    ///
    /// Creates a task for each CPU to read events from its perf buffer.
    pub fn spawn_cpu_readers(&self, mut perf_array: AsyncPerfEventArray<MapData>) -> Result<()> {
        let cpus = online_cpus()?;
        info!("Spawning event readers for {} CPUs", cpus.len());

        for cpu_id in cpus {
            let mut buf = perf_array.open(cpu_id, None)?;
            let processor = self.clone();

            tokio::spawn(async move {
                // Room for the record plus perf alignment padding
                let mut buffers = (0..PERF_READ_BATCH)
                    .map(|_| BytesMut::with_capacity(RECORD_SIZE + 8))
                    .collect::<Vec<_>>();

                loop {
                    let events = match buf.read_events(&mut buffers).await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error reading events from CPU {}: {}", cpu_id, e);
                            continue;
                        }
                    };

                    if events.lost > 0 {
                        processor.stats.record_lost_samples(events.lost as u64);
                        debug!("CPU {} lost {} samples", cpu_id, events.lost);
                    }

                    for record in buffers.iter_mut().take(events.read) {
                        processor.ingest(record);
                    }
                }
            });
        }

        Ok(())
    }

    /// Spawn progress reporter
    ///
    /// Periodically logs the service counters. An interval of zero disables it.
    pub fn spawn_progress_reporter(&self, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let snapshot = stats.snapshot();
                info!(
                    "Progress: {} events applied, {} live connections, {} samples flushed, {} decode failures, {} mailbox drops",
                    snapshot.event_type_breakdown.total(),
                    snapshot.active_records,
                    snapshot.samples_flushed,
                    snapshot.decode_failures,
                    snapshot.mailbox_drops
                );
            }
        });
    }
}

fn log_event(event: &LifecycleEvent) {
    let q = event.quartet();
    match event {
        LifecycleEvent::Publish(_, sample) => debug!(
            "{:<10} {:<40} {:<40} rx_b={} tx_b={} srtt_us={}",
            event.action(),
            format!("{}:{}", q.src_ip, q.src_port),
            format!("{}:{}", q.dst_ip, q.dst_port),
            sample.rx_b,
            sample.tx_b,
            sample.srtt_us
        ),
        _ => debug!(
            "{:<10} {:<40} {:<40}",
            event.action(),
            format!("{}:{}", q.src_ip, q.src_port),
            format!("{}:{}", q.dst_ip, q.dst_port)
        ),
    }
}
