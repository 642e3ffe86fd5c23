//! Service wiring
//!
//! Starts the correlation actor and the control server around a shared
//! mailbox. Kernel ingress attaches to the same mailbox through
//! [`Service::mailbox`].

use crate::{
    actor::{mailbox, CorrelationActor, MailboxSender},
    config::ServiceConfig,
    server::ControlServer,
    stats::{ServiceStats, StatsSnapshot},
    store::TraceStore,
};
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};

/// Running correlation service
pub struct Service {
    mailbox: MailboxSender,
    stats: Arc<ServiceStats>,
    stop: oneshot::Sender<()>,
    actor: JoinHandle<TraceStore>,
    server: JoinHandle<Result<()>>,
}

/// State handed back by [`Service::shutdown`]
#[derive(Debug)]
pub struct ShutdownReport {
    /// Final counter values
    pub stats: StatsSnapshot,
    /// Records still live when the actor stopped
    pub store: TraceStore,
}

impl Service {
    /// Bind the control socket and spawn the actor and server tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(ServiceStats::new());
        let (tx, rx) = mailbox(config.mailbox_capacity, Arc::clone(&stats));
        let server = ControlServer::bind(&config.socket_path, tx.clone(), Arc::clone(&stats))?;

        let (stop, stopped) = oneshot::channel();
        let actor = tokio::spawn(CorrelationActor::new(rx, Arc::clone(&stats)).run_until(
            async move {
                let _ = stopped.await;
            },
        ));
        let server = tokio::spawn(server.run());
        info!(
            "Correlation service started (mailbox capacity {})",
            config.mailbox_capacity
        );

        Ok(Self {
            mailbox: tx,
            stats,
            stop,
            actor,
            server,
        })
    }

    /// A producer handle onto the actor's mailbox
    pub fn mailbox(&self) -> MailboxSender {
        self.mailbox.clone()
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the server and actor, removing the control socket
    ///
    /// Connected clients keep mailbox senders alive, so the actor is told to
    /// stop instead of waiting for the mailbox to close.
    ///
    /// # Returns
    ///
    /// Final counters and the trace store the actor owned
    pub async fn shutdown(self) -> ShutdownReport {
        self.server.abort();
        match self.server.await {
            Ok(Err(e)) => warn!("Control server failed: {:#}", e),
            Err(e) if !e.is_cancelled() => warn!("Control server task failed: {}", e),
            _ => {}
        }

        // The actor may have exited already if every sender was dropped
        let _ = self.stop.send(());
        let store = match self.actor.await {
            Ok(store) => store,
            Err(e) => {
                warn!("Correlation actor task failed: {}", e);
                TraceStore::default()
            }
        };

        info!(
            "Correlation service stopped with {} live records",
            store.len()
        );
        ShutdownReport {
            stats: self.stats.snapshot(),
            store,
        }
    }
}
