//! Correlation actor
//!
//! The single owner of the trace store. Kernel event readers and control
//! clients hand it work through a multi-producer mailbox; events are applied
//! strictly in arrival order.

use crate::{
    stats::ServiceStats,
    store::TraceStore,
    types::LifecycleEvent,
};
use log::{debug, info, warn};
use std::{future::Future, sync::Arc};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Create the mailbox feeding the correlation actor
///
/// # Arguments
///
/// * `capacity` - Maximum number of queued events before sends are dropped
/// * `stats` - Shared counters recording dropped sends
pub fn mailbox(
    capacity: usize,
    stats: Arc<ServiceStats>,
) -> (MailboxSender, mpsc::Receiver<LifecycleEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MailboxSender { tx, stats }, rx)
}

/// Producer half of the mailbox
///
/// Sending never waits: when the mailbox is full the event is dropped and
/// counted.
#[derive(Clone, Debug)]
pub struct MailboxSender {
    tx: mpsc::Sender<LifecycleEvent>,
    stats: Arc<ServiceStats>,
}

impl MailboxSender {
    /// Enqueue an event without blocking
    ///
    /// # Returns
    ///
    /// `true` if the event was queued
    pub fn post(&self, event: LifecycleEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.stats.record_mailbox_drop();
                // Log on powers of two only
                if dropped.is_power_of_two() {
                    warn!(
                        "Mailbox full, dropped {} event for {} ({} drops so far)",
                        event.action(),
                        event.quartet(),
                        dropped
                    );
                }
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.record_mailbox_drop();
                debug!(
                    "Mailbox closed, dropped {} event for {}",
                    event.action(),
                    event.quartet()
                );
                false
            }
        }
    }
}

/// Applies lifecycle events to the trace store
pub struct CorrelationActor {
    store: TraceStore,
    mailbox: mpsc::Receiver<LifecycleEvent>,
    stats: Arc<ServiceStats>,
}

impl CorrelationActor {
    pub fn new(mailbox: mpsc::Receiver<LifecycleEvent>, stats: Arc<ServiceStats>) -> Self {
        Self {
            store: TraceStore::new(),
            mailbox,
            stats,
        }
    }

    /// Drain the mailbox until every sender is gone
    ///
    /// # Returns
    ///
    /// The trace store as it stood when the mailbox closed
    pub async fn run(self) -> TraceStore {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Drain the mailbox until every sender is gone or `shutdown` completes
    ///
    /// Events still queued when `shutdown` completes are not applied.
    ///
    /// # Returns
    ///
    /// The trace store as it stood when the loop ended
    pub async fn run_until<F>(mut self, shutdown: F) -> TraceStore
    where
        F: Future<Output = ()>,
    {
        info!("Correlation actor started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Correlation actor received shutdown");
                    break;
                }
                event = self.mailbox.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
            }
        }

        info!(
            "Correlation actor stopped with {} live records",
            self.store.len()
        );
        self.store
    }

    /// Apply a single event to the store
    pub fn apply(&mut self, event: LifecycleEvent) {
        self.stats.record_action(event.action());

        let mut response = None;
        match event {
            LifecycleEvent::Register(quartet) => {
                if self.store.create(quartet) {
                    debug!("register {} (replaced existing record)", quartet);
                } else {
                    debug!("register {}", quartet);
                }
            }
            LifecycleEvent::Unregister(quartet) => {
                if self.store.remove(&quartet) {
                    debug!("unregister {}", quartet);
                }
            }
            LifecycleEvent::Publish(quartet, sample) => {
                if !self.store.append(&quartet, sample) {
                    self.stats.record_orphan_publish();
                }
            }
            LifecycleEvent::Flush { quartet, reply } => {
                let samples = self.store.drain(&quartet, &quartet.reversed());
                self.stats.record_flush(samples.len());
                debug!("flush {}: {} samples", quartet, samples.len());
                response = Some((quartet, reply, samples));
            }
        }

        // Counters are current before the requester sees its reply
        self.stats.set_active_records(self.store.len());

        if let Some((quartet, reply, samples)) = response {
            // The requesting client may already be gone
            if reply.send(samples).is_err() {
                debug!("flush requester for {} disconnected", quartet);
            }
        }
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }
}
