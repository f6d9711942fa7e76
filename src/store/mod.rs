//! Persistence seams: the account repository and the message store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Account, EmailMessage};

mod sqlite;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

/// Outcome of an insert-if-absent. A conflict is a normal result, not
/// an error: it is how redelivered messages are absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, account_id: &str) -> Result<Account, StoreError>;

    async fn list_active(&self) -> Result<Vec<Account>, StoreError>;

    async fn update_last_synced(
        &self,
        account_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn exists(&self, message_id: &str) -> Result<bool, StoreError>;

    async fn insert(&self, message: &EmailMessage) -> Result<InsertOutcome, StoreError>;
}
