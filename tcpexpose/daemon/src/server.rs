//! Control socket server
//!
//! Accepts local clients on a Unix domain socket, turns their requests into
//! flush events for the correlation actor and streams the drained samples
//! back as newline-delimited JSON.

use crate::{
    actor::MailboxSender,
    protocol::{encode_samples, RequestParser},
    stats::ServiceStats,
    types::{LifecycleEvent, Quartet},
};
use anyhow::{Context, Result};
use bytes::BytesMut;
use log::{debug, info, warn};
use std::{
    fs,
    io::ErrorKind,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::UnixListener,
    sync::oneshot,
};

/// Size of the per-client read buffer
const READ_BUFFER_SIZE: usize = 1024;

/// Listener for flush requests
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    mailbox: MailboxSender,
    stats: Arc<ServiceStats>,
}

impl ControlServer {
    /// Bind the control socket
    ///
    /// A stale socket left by a previous run is replaced. Any other file at
    /// `path` is left alone and binding fails.
    pub fn bind(
        path: impl AsRef<Path>,
        mailbox: MailboxSender,
        stats: Arc<ServiceStats>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind control socket: {:?}", path))?;
        info!("Control socket listening on {:?}", path);

        Ok(Self {
            listener,
            path,
            mailbox,
            stats,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until the task is cancelled
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept control client: {}", e);
                    continue;
                }
            };

            let client_id = self.stats.record_client_connection();
            let mailbox = self.mailbox.clone();
            let stats = Arc::clone(&self.stats);
            debug!("client #{} connected", client_id);

            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                match serve_client(reader, writer, &mailbox, &stats).await {
                    Ok(()) => debug!("client #{} disconnected", client_id),
                    Err(e) => debug!("client #{} dropped: {:#}", client_id, e),
                }
            });
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove control socket {:?}: {}", self.path, e);
            }
        }
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!("Removing stale control socket {:?}", path);
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket: {:?}", path))
        }
        Ok(_) => anyhow::bail!("{:?} exists and is not a socket", path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect {:?}", path)),
    }
}

/// Serve one client connection until it closes
///
/// Requests are answered in the order received. Malformed requests are
/// counted and ignored. Returns an error only when the client can no longer
/// be read from or written to.
pub async fn serve_client<R, W>(
    mut reader: R,
    mut writer: W,
    mailbox: &MailboxSender,
    stats: &ServiceStats,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut parser = RequestParser::new();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        buf.clear();
        let read = reader
            .read_buf(&mut buf)
            .await
            .context("Failed to read from control client")?;

        let requests = if read == 0 {
            parser.finish()
        } else {
            parser.feed(&buf)
        };

        for request in requests {
            match request {
                Ok(quartet) => flush(quartet, mailbox, &mut writer).await?,
                Err(e) => {
                    stats.record_malformed_request();
                    debug!("Ignoring malformed request: {}", e);
                }
            }
        }

        if read == 0 {
            return Ok(());
        }
    }
}

async fn flush<W>(quartet: Quartet, mailbox: &MailboxSender, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (reply, response) = oneshot::channel();
    if !mailbox.post(LifecycleEvent::Flush { quartet, reply }) {
        return Ok(());
    }

    // The actor only drops the reply if it is shutting down
    let samples = match response.await {
        Ok(samples) => samples,
        Err(_) => return Ok(()),
    };

    let payload = encode_samples(&samples).context("Failed to encode trace samples")?;
    writer
        .write_all(&payload)
        .await
        .context("Failed to write flush response")?;
    writer.flush().await.context("Failed to flush response")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{actor::{mailbox, CorrelationActor}, types::TraceSample};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    fn quartet() -> Quartet {
        Quartet::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.2".parse().unwrap(),
            5000,
            80,
        )
    }

    #[tokio::test]
    async fn test_serve_client_over_duplex() {
        let stats = Arc::new(ServiceStats::new());
        let (tx, rx) = mailbox(64, Arc::clone(&stats));
        tokio::spawn(CorrelationActor::new(rx, Arc::clone(&stats)).run());

        tx.post(LifecycleEvent::Register(quartet()));
        tx.post(LifecycleEvent::Publish(
            quartet(),
            TraceSample {
                rx_b: 100,
                ..Default::default()
            },
        ));

        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let server_stats = Arc::clone(&stats);
        let server_tx = tx.clone();
        let task = tokio::spawn(async move {
            serve_client(server_read, server_write, &server_tx, &server_stats).await
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"garbage 10.0.0.1 1 2\n10.0.0.1 10.0.0.2 5000 80\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let sample: TraceSample = serde_json::from_str(&line).unwrap();
        assert_eq!(sample.rx_b, 100);

        client_write.shutdown().await.unwrap();
        drop(client_write);
        task.await.unwrap().unwrap();
        assert_eq!(stats.snapshot().malformed_requests, 1);
    }

    #[tokio::test]
    async fn test_bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        fs::write(&path, b"keep me").unwrap();

        let stats = Arc::new(ServiceStats::new());
        let (tx, _rx) = mailbox(4, Arc::clone(&stats));
        assert!(ControlServer::bind(&path, tx, stats).is_err());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);

        let stats = Arc::new(ServiceStats::new());
        let (tx, _rx) = mailbox(4, Arc::clone(&stats));
        let server = ControlServer::bind(&path, tx, stats).unwrap();
        assert_eq!(server.path(), path.as_path());

        drop(server);
        assert!(!path.exists());
    }
}
