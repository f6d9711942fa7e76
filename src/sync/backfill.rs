//! Historical backfill: everything received within the lookback
//! window, in bounded batches.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future;
use log::{debug, info};
use tokio::sync::watch;
use tokio::time::sleep;

use super::{wait_for_stop, SyncError, SyncSettings};
use crate::imap::transport::MailSession;
use crate::ingest::{IngestOutcome, IngestPipeline};
use crate::models::Account;

/// Fetches and ingests every message received within the lookback
/// window. Returns the number of messages that made it through the
/// pipeline (ingested or already known).
///
/// Batches run strictly one after another; members of a batch are
/// ingested concurrently, so at most `batch_size` pipeline runs are in
/// flight at any point. A failed message costs itself; a failed fetch
/// aborts the whole backfill as a connection error.
pub async fn run_backfill(
    session: &mut dyn MailSession,
    account: &Account,
    pipeline: &IngestPipeline,
    settings: &SyncSettings,
    stop: &watch::Receiver<bool>,
) -> Result<usize, SyncError> {
    let since = Utc::now() - ChronoDuration::days(settings.lookback_days);
    let uids = session.search_since(since).await?;
    info!(
        "backfill for {}: {} messages since {}",
        account.id,
        uids.len(),
        since.format("%Y-%m-%d")
    );

    let batch_size = settings.batch_size.max(1);
    let mut processed = 0usize;

    for (batch_index, batch) in uids.chunks(batch_size).enumerate() {
        // the pause keeps classify/persist/index pressure bounded and
        // gives the remote server room to breathe
        if batch_index > 0 {
            tokio::select! {
                _ = wait_for_stop(stop) => return Err(SyncError::Cancelled),
                _ = sleep(settings.batch_pause) => {}
            }
        }
        let raw_messages = tokio::select! {
            _ = wait_for_stop(stop) => return Err(SyncError::Cancelled),
            fetched = session.fetch_batch(batch) => fetched?,
        };
        debug!(
            "backfill batch {} for {}: {} messages",
            batch_index + 1,
            account.id,
            raw_messages.len()
        );

        let outcomes = future::join_all(
            raw_messages
                .iter()
                .map(|raw| pipeline.ingest(raw, account, &settings.mailbox)),
        )
        .await;

        processed += outcomes
            .iter()
            .filter(|outcome| !matches!(outcome, IngestOutcome::Skipped))
            .count();
    }

    Ok(processed)
}
