//! Message ingestion pipeline.
//!
//! `ingest` is infallible per message: whatever goes wrong inside, the
//! caller gets an outcome, never an error. One bad message can cost
//! itself, but never a batch or the listener.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use mail_parser::{Addr, MessageParser};
use thiserror::Error;

use crate::classify::Classifier;
use crate::imap::transport::RawMessage;
use crate::models::{truncate_body, Account, Category, EmailMessage};
use crate::notify::NotificationDispatcher;
use crate::search::SearchIndexer;
use crate::store::{InsertOutcome, MessageStore, StoreError};

/// Per-message result of running the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Parsed, classified, persisted (and side effects attempted).
    Ingested,
    /// A record with this dedup key already exists; nothing was done.
    AlreadyProcessed,
    /// The message could not be processed; a warning was logged.
    Skipped,
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct IngestPipeline {
    store: Arc<dyn MessageStore>,
    classifier: Arc<dyn Classifier>,
    indexer: Arc<dyn SearchIndexer>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn MessageStore>,
        classifier: Arc<dyn Classifier>,
        indexer: Arc<dyn SearchIndexer>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            classifier,
            indexer,
            notifier,
        }
    }

    /// Runs one raw message through parse → dedup → classify → persist
    /// → index → notify.
    pub async fn ingest(
        &self,
        raw: &RawMessage,
        account: &Account,
        folder: &str,
    ) -> IngestOutcome {
        match self.try_ingest(raw, account, folder).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "ingest failed for UID {} on {}: {}",
                    raw.uid, account.id, e
                );
                IngestOutcome::Skipped
            }
        }
    }

    async fn try_ingest(
        &self,
        raw: &RawMessage,
        account: &Account,
        folder: &str,
    ) -> Result<IngestOutcome, IngestError> {
        // Step 1: parse the transport payload.
        let parsed = match MessageParser::default().parse(&raw.body) {
            Some(parsed) => parsed,
            None => {
                warn!(
                    "unparseable message payload, UID {} on {}",
                    raw.uid, account.id
                );
                return Ok(IngestOutcome::Skipped);
            }
        };

        // A payload with no recognizable headers cannot be keyed or
        // attributed.
        if parsed.message_id().is_none() && parsed.from().is_none() && parsed.subject().is_none() {
            warn!("no headers found for UID {} on {}", raw.uid, account.id);
            return Ok(IngestOutcome::Skipped);
        }

        // Step 2: dedup key, falling back to account id + server UID.
        let message_id = match parsed.message_id() {
            Some(id) => id.to_string(),
            None => format!("{}-{}", account.id, raw.uid),
        };

        // Step 3: redelivered messages are absorbed here.
        if self.store.exists(&message_id).await? {
            return Ok(IngestOutcome::AlreadyProcessed);
        }

        let from_address = parsed
            .from()
            .and_then(|addrs| addrs.first())
            .map(format_address)
            .unwrap_or_else(|| "unknown".to_string());
        let to_addresses = parsed
            .to()
            .map(|addrs| addrs.iter().map(format_address).collect())
            .unwrap_or_default();
        let subject = parsed.subject().unwrap_or("(no subject)").to_string();
        let body = parsed
            .text_bodies()
            .next()
            .map(|part| String::from_utf8_lossy(part.contents()).into_owned())
            .unwrap_or_default();
        let body = truncate_body(body);
        let received_at = message_date(&parsed)
            .or(raw.internal_date)
            .unwrap_or_else(Utc::now);

        // Step 4: classify.
        let category = self
            .classifier
            .classify(&subject, &body, &from_address);

        let message = EmailMessage {
            message_id,
            account_id: account.id.clone(),
            from_address,
            to_addresses,
            subject,
            body,
            received_at,
            folder: folder.to_string(),
            category,
            is_read: false,
        };

        // Step 5: persist. A conflict means someone beat us to it
        // between the existence check and here; same as step 3.
        match self.store.insert(&message).await? {
            InsertOutcome::Conflict => return Ok(IngestOutcome::AlreadyProcessed),
            InsertOutcome::Created => {}
        }

        // Step 6: index, isolated.
        if let Err(e) = self.indexer.index(&message).await {
            warn!("search indexing failed for {}: {}", message.message_id, e);
        }

        // Step 7: notify on Interested only, isolated.
        if message.category == Category::Interested {
            if let Err(e) = self.notifier.notify(&message, message.category).await {
                warn!(
                    "notification dispatch failed for {}: {}",
                    message.message_id, e
                );
            }
        }

        debug!(
            "ingested {} [{}] for {}",
            message.message_id, message.category, account.id
        );
        Ok(IngestOutcome::Ingested)
    }
}

fn message_date(parsed: &mail_parser::Message<'_>) -> Option<DateTime<Utc>> {
    parsed
        .date()
        .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn format_address(addr: &Addr<'_>) -> String {
    if let Some(address) = addr.address() {
        if let Some(name) = addr.name() {
            format!("{} <{}>", name, address)
        } else {
            address.to_string()
        }
    } else if let Some(name) = addr.name() {
        name.to_string()
    } else {
        "unknown".to_string()
    }
}
