//! Per-account mailbox synchronization engine.
//!
//! [`SyncEngine`] owns the account-id → supervisor registry. Each
//! supervisor task drives one account through
//! `Connecting → Backfilling → Listening`, reconnecting with a fixed
//! two-tier backoff until stopped.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::models::DEFAULT_MAILBOX;
use crate::imap::error::TransportError;
use crate::store::StoreError;

pub mod backfill;
pub mod listener;
pub mod supervisor;

pub use supervisor::{SupervisorState, SyncEngine, SyncStatus};

/// Errors that cross the supervisor boundary. Everything else is
/// absorbed and logged at the component that detected it.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sync already running for {0}")]
    AlreadyRunning(String),

    #[error("account repository error: {0}")]
    Repository(#[from] StoreError),

    #[error("sync cancelled")]
    Cancelled,
}

/// Engine tuning, shared by every supervisor this engine spawns.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mailbox: String,
    pub lookback_days: i64,
    pub batch_size: usize,
    pub batch_pause: Duration,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay: Duration,
    /// Delay once a reconnection attempt itself has failed.
    pub reconnect_retry_delay: Duration,
    pub idle_window: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mailbox: DEFAULT_MAILBOX.to_string(),
            lookback_days: 30,
            batch_size: 10,
            batch_pause: Duration::from_millis(500),
            reconnect_delay: Duration::from_secs(5),
            reconnect_retry_delay: Duration::from_secs(30),
            idle_window: Duration::from_secs(1740),
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            mailbox: config.mailbox.clone(),
            lookback_days: config.lookback_days,
            batch_size: config.batch_size.max(1),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            reconnect_retry_delay: Duration::from_secs(config.reconnect_retry_delay_secs),
            idle_window: Duration::from_secs(config.idle_window_secs),
        }
    }
}

/// Resolves when the stop flag flips true (or its sender is gone,
/// which only happens when the engine itself is dropped).
pub(crate) async fn wait_for_stop(stop: &watch::Receiver<bool>) {
    let mut stop = stop.clone();
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
