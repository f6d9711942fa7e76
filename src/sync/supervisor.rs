//! Per-account supervisor and the engine-level registry.
//!
//! The registry is the only place sessions are born and buried. Other
//! components never see it; the "at most one session per account"
//! invariant is a consequence of ownership, not of locking discipline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{backfill, listener, wait_for_stop, SyncError, SyncSettings};
use crate::imap::transport::{MailSession, MailTransport};
use crate::ingest::IngestPipeline;
use crate::models::Account;
use crate::store::{AccountRepository, StoreError};

/// Lifecycle of one account's supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Connecting,
    Backfilling,
    Listening,
    Reconnecting,
    Stopped,
}

impl SupervisorState {
    /// Connected means a live, authenticated session exists.
    pub fn is_connected(&self) -> bool {
        matches!(self, SupervisorState::Backfilling | SupervisorState::Listening)
    }
}

/// Point-in-time view of one account's sync state.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub account_id: String,
    pub state: SupervisorState,
    pub connected: bool,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: SupervisorState,
    last_error: Option<String>,
    retry_count: u32,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            state: SupervisorState::Idle,
            last_error: None,
            retry_count: 0,
        }
    }
}

/// Registry entry for a running supervisor. Dropping the handle after
/// `stop` drops the last sender, but the task has already exited by
/// then.
struct AccountHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

/// Owns every account supervisor. One engine instance manages a given
/// account id at a time; callers that need new connection parameters
/// must `stop` then `start`.
pub struct SyncEngine {
    transport: Arc<dyn MailTransport>,
    accounts: Arc<dyn AccountRepository>,
    pipeline: Arc<IngestPipeline>,
    settings: SyncSettings,
    registry: Mutex<HashMap<String, AccountHandle>>,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        accounts: Arc<dyn AccountRepository>,
        pipeline: Arc<IngestPipeline>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            transport,
            accounts,
            pipeline,
            settings,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns a supervisor for the account. Fails with `AlreadyRunning`
    /// if one is live, and with a configuration error (synchronously,
    /// never retried) if required connection fields are missing.
    pub async fn start(&self, account_id: &str) -> Result<(), SyncError> {
        let mut registry = self.registry.lock().await;

        if let Some(handle) = registry.get(account_id) {
            if !handle.task.is_finished() {
                return Err(SyncError::AlreadyRunning(account_id.to_string()));
            }
            // a panicked task leaves a dead entry behind; replace it
            registry.remove(account_id);
        }

        let account = self.accounts.get(account_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => {
                SyncError::Configuration(format!("account {} is not registered", id))
            }
            other => SyncError::Repository(other),
        })?;

        if let Some(field) = account.imap.missing_field() {
            return Err(SyncError::Configuration(format!(
                "account {} has no usable IMAP {}",
                account.id, field
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(Snapshot::idle());

        let ctx = SupervisorCtx {
            account,
            transport: Arc::clone(&self.transport),
            accounts: Arc::clone(&self.accounts),
            pipeline: Arc::clone(&self.pipeline),
            settings: self.settings.clone(),
            stop: stop_rx,
            state: state_tx,
        };
        let task = tokio::spawn(run_supervisor(ctx));

        registry.insert(
            account_id.to_string(),
            AccountHandle {
                stop_tx,
                state_rx,
                task,
            },
        );
        info!("started sync supervisor for {}", account_id);
        Ok(())
    }

    /// Stops the account's supervisor. Idempotent: without a running
    /// supervisor this is a successful no-op. When it returns, no new
    /// batch or fetch will begin and the session has been closed.
    pub async fn stop(&self, account_id: &str) -> Result<(), SyncError> {
        let handle = self.registry.lock().await.remove(account_id);

        let handle = match handle {
            Some(handle) => handle,
            None => {
                debug!("stop for {}: no active supervisor", account_id);
                return Ok(());
            }
        };

        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.task.await {
            error!("supervisor task for {} failed: {}", account_id, e);
        }
        info!("stopped sync for {}", account_id);
        Ok(())
    }

    /// Current sync state for the account. Unknown accounts report
    /// idle/disconnected.
    pub async fn status(&self, account_id: &str) -> SyncStatus {
        let registry = self.registry.lock().await;
        let snapshot = registry
            .get(account_id)
            .map(|handle| handle.state_rx.borrow().clone())
            .unwrap_or_else(Snapshot::idle);

        SyncStatus {
            account_id: account_id.to_string(),
            connected: snapshot.state.is_connected(),
            state: snapshot.state,
            last_error: snapshot.last_error,
            retry_count: snapshot.retry_count,
        }
    }

    /// Stops every running supervisor. Used at daemon shutdown.
    pub async fn stop_all(&self) {
        let handles: Vec<(String, AccountHandle)> =
            self.registry.lock().await.drain().collect();

        for (account_id, handle) in handles {
            let _ = handle.stop_tx.send(true);
            if let Err(e) = handle.task.await {
                error!("supervisor task for {} failed: {}", account_id, e);
            }
            info!("stopped sync for {}", account_id);
        }
    }
}

struct SupervisorCtx {
    account: Account,
    transport: Arc<dyn MailTransport>,
    accounts: Arc<dyn AccountRepository>,
    pipeline: Arc<IngestPipeline>,
    settings: SyncSettings,
    stop: watch::Receiver<bool>,
    state: watch::Sender<Snapshot>,
}

impl SupervisorCtx {
    fn set_state(&self, state: SupervisorState, last_error: Option<String>, retry_count: u32) {
        let _ = self.state.send(Snapshot {
            state,
            last_error,
            retry_count,
        });
    }
}

/// One account's whole lifecycle: connect, backfill, listen, and on
/// failure back off and start the cycle again. Runs until stopped.
async fn run_supervisor(ctx: SupervisorCtx) {
    let account_id = ctx.account.id.clone();
    // consecutive failed cycles; picks the backoff tier
    let mut failures: u32 = 0;

    loop {
        if *ctx.stop.borrow() {
            ctx.set_state(SupervisorState::Stopped, None, failures);
            break;
        }

        ctx.set_state(SupervisorState::Connecting, None, failures);
        let mut session = match ctx.transport.connect(&ctx.account).await {
            Ok(session) => session,
            Err(e) => {
                warn!("connect failed for {}: {}", account_id, e);
                failures += 1;
                if !backoff(&ctx, failures, &e.to_string()).await {
                    ctx.set_state(SupervisorState::Stopped, None, failures);
                    break;
                }
                continue;
            }
        };
        failures = 0;

        let result = run_connected(&ctx, session.as_mut()).await;

        // Exactly one close per connection cycle, whatever happened.
        if let Err(e) = session.close().await {
            debug!("error closing session for {}: {}", account_id, e);
        }

        match result {
            Err(SyncError::Cancelled) => {
                ctx.set_state(SupervisorState::Stopped, None, failures);
                break;
            }
            Err(e) => {
                warn!("session error for {}: {}", account_id, e);
                failures += 1;
                if !backoff(&ctx, failures, &e.to_string()).await {
                    ctx.set_state(SupervisorState::Stopped, None, failures);
                    break;
                }
            }
            Ok(()) => {
                // the listener only returns by error or cancellation;
                // treat a bare exit like a closed session
                warn!("listener for {} exited unexpectedly", account_id);
                failures += 1;
                if !backoff(&ctx, failures, "session closed").await {
                    ctx.set_state(SupervisorState::Stopped, None, failures);
                    break;
                }
            }
        }
    }

    info!("supervisor for {} stopped", account_id);
}

/// Everything that happens on top of one live session. Errors bubble
/// out so the caller can close the session in a single place.
async fn run_connected(
    ctx: &SupervisorCtx,
    session: &mut dyn MailSession,
) -> Result<(), SyncError> {
    session.select_mailbox(&ctx.settings.mailbox).await?;

    ctx.set_state(SupervisorState::Backfilling, None, 0);
    let count =
        backfill::run_backfill(session, &ctx.account, &ctx.pipeline, &ctx.settings, &ctx.stop)
            .await?;
    info!("backfill complete for {}: {} messages", ctx.account.id, count);

    // Last-synced moves only after a backfill actually finished.
    if let Err(e) = ctx
        .accounts
        .update_last_synced(&ctx.account.id, Utc::now())
        .await
    {
        warn!("failed to record last-synced for {}: {}", ctx.account.id, e);
    }

    ctx.set_state(SupervisorState::Listening, None, 0);
    listener::listen(session, &ctx.account, &ctx.pipeline, &ctx.settings, &ctx.stop).await
}

/// Waits out the reconnect delay for the current failure tier.
/// Returns false if a stop arrived while waiting.
async fn backoff(ctx: &SupervisorCtx, failures: u32, error: &str) -> bool {
    let delay = if failures <= 1 {
        ctx.settings.reconnect_delay
    } else {
        ctx.settings.reconnect_retry_delay
    };
    ctx.set_state(
        SupervisorState::Reconnecting,
        Some(error.to_string()),
        failures,
    );
    info!(
        "reconnecting {} in {:?} (attempt {})",
        ctx.account.id, delay, failures
    );

    tokio::select! {
        _ = wait_for_stop(&ctx.stop) => false,
        _ = sleep(delay) => true,
    }
}
