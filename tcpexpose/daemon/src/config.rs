//! Service configuration

use crate::types::kernel::constants::*;
use anyhow::Result;
use std::path::PathBuf;

/// Settings for the correlation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Path of the control socket
    pub socket_path: PathBuf,
    /// Events queued for the actor before producers start dropping
    pub mailbox_capacity: usize,
    /// Progress report interval in seconds (0 = disabled)
    pub progress_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            anyhow::bail!("Mailbox capacity must be >= 1");
        }
        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("Control socket path must not be empty");
        }
        Ok(())
    }
}
