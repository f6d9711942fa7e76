//! Search indexing collaborator.
//!
//! Indexing is strictly best-effort: the ingestion pipeline logs and
//! moves on when a call here fails, and the daemon runs fine with the
//! [`NullIndexer`] when no backend is configured.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde_json::json;
use thiserror::Error;

use crate::models::EmailMessage;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("index rejected document: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn index(&self, message: &EmailMessage) -> Result<(), IndexError>;
}

/// Indexer that does nothing. Used when no search backend is
/// configured.
pub struct NullIndexer;

#[async_trait]
impl SearchIndexer for NullIndexer {
    async fn index(&self, _message: &EmailMessage) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Elasticsearch-over-HTTP indexer.
pub struct ElasticIndexer {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticIndexer {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            index: index.into(),
        }
    }

    /// Creates the index with its mappings if it does not exist yet.
    /// An "already exists" rejection from a concurrent creator is fine.
    pub async fn ensure_index(&self) -> Result<(), IndexError> {
        let index_url = format!("{}/{}", self.base_url, self.index);

        let head = self.client.head(&index_url).send().await?;
        if head.status().is_success() {
            debug!("search index '{}' already exists", self.index);
            return Ok(());
        }

        let mappings = json!({
            "mappings": {
                "properties": {
                    "messageId":  { "type": "keyword" },
                    "accountId":  { "type": "keyword" },
                    "folder":     { "type": "keyword" },
                    "from":       { "type": "text", "fields": { "keyword": { "type": "keyword" } } },
                    "to":         { "type": "text" },
                    "subject":    { "type": "text" },
                    "body":       { "type": "text" },
                    "category":   { "type": "keyword" },
                    "date":       { "type": "date" },
                    "timestamp":  { "type": "date" }
                }
            }
        });

        let response = self.client.put(&index_url).json(&mappings).send().await?;
        if response.status().is_success() {
            info!("created search index '{}'", self.index);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexError::Rejected(body))
    }
}

#[async_trait]
impl SearchIndexer for ElasticIndexer {
    async fn index(&self, message: &EmailMessage) -> Result<(), IndexError> {
        let url = format!(
            "{}/{}/_doc/{}",
            self.base_url,
            self.index,
            urlencoding::encode(&message.message_id)
        );

        let document = json!({
            "messageId": message.message_id,
            "accountId": message.account_id,
            "folder": message.folder,
            "from": message.from_address,
            "to": message.to_addresses,
            "subject": message.subject,
            "body": message.body,
            "category": message.category.as_str(),
            "date": message.received_at,
            "timestamp": Utc::now(),
        });

        let response = self.client.put(&url).json(&document).send().await?;
        if !response.status().is_success() {
            return Err(IndexError::Rejected(format!(
                "status {} for {}",
                response.status(),
                message.message_id
            )));
        }

        debug!("indexed message {}", message.message_id);
        Ok(())
    }
}
