//! Live update listener: reacts to server push events after backfill.

use log::{debug, info};
use tokio::sync::watch;

use super::{wait_for_stop, SyncError, SyncSettings};
use crate::imap::error::TransportError;
use crate::imap::transport::{MailSession, SessionEvent};
use crate::ingest::IngestPipeline;
use crate::models::Account;

/// Consumes session events until stopped or the session dies.
///
/// New mail is ingested strictly one message at a time so persisted
/// records keep the mailbox's temporal order. This function never
/// reconnects; connection trouble is returned to the supervisor, which
/// owns all retry policy.
pub async fn listen(
    session: &mut dyn MailSession,
    account: &Account,
    pipeline: &IngestPipeline,
    settings: &SyncSettings,
    stop: &watch::Receiver<bool>,
) -> Result<(), SyncError> {
    info!("live listening armed for {}", account.id);

    loop {
        let event = tokio::select! {
            _ = wait_for_stop(stop) => return Err(SyncError::Cancelled),
            event = session.next_event(settings.idle_window) => event?,
        };

        match event {
            SessionEvent::NewMail { count } => {
                debug!("new mail for {} ({} reported)", account.id, count);
                let uids = session.search_unseen().await?;
                for uid in uids {
                    if *stop.borrow() {
                        return Err(SyncError::Cancelled);
                    }
                    let raw_messages = session.fetch_batch(&[uid]).await?;
                    for raw in &raw_messages {
                        pipeline.ingest(raw, account, &settings.mailbox).await;
                    }
                }
            }
            SessionEvent::KeepAlive => continue,
            SessionEvent::Closed => {
                return Err(SyncError::Connection(TransportError::Closed));
            }
        }
    }
}
