use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::{AccountRepository, InsertOutcome, MessageStore, StoreError};
use crate::models::{Account, EmailMessage, ImapConfig};

/// SQLite-backed implementation of both persistence seams.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database and ensures the
    /// schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email_address TEXT NOT NULL UNIQUE,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_user TEXT NOT NULL,
                imap_pass TEXT NOT NULL,
                imap_use_tls INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_synced_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emails (
                message_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_addresses TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                folder TEXT NOT NULL,
                category TEXT NOT NULL,
                received_at TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_emails_account_received ON emails(account_id, received_at)",
        )
        .execute(&self.pool)
        .await?;

        debug!("database schema ready");
        Ok(())
    }

    /// Registers or refreshes a configured account. Connection
    /// parameters and the activity flag are overwritten; sync progress
    /// (`last_synced_at`) is preserved.
    pub async fn upsert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, email_address, imap_host, imap_port, imap_user, imap_pass, imap_use_tls, is_active, last_synced_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                imap_host = excluded.imap_host,
                imap_port = excluded.imap_port,
                imap_user = excluded.imap_user,
                imap_pass = excluded.imap_pass,
                imap_use_tls = excluded.imap_use_tls,
                is_active = excluded.is_active
            "#,
        )
        .bind(&account.id)
        .bind(&account.email_address)
        .bind(&account.imap.host)
        .bind(account.imap.port as i64)
        .bind(&account.imap.username)
        .bind(&account.imap.password)
        .bind(account.imap.use_tls)
        .bind(account.is_active)
        .bind(account.last_synced_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await?;

        info!("registered account {}", account.id);
        Ok(())
    }
}

type AccountRow = (
    String,                    // id
    String,                    // email_address
    String,                    // imap_host
    i64,                       // imap_port
    String,                    // imap_user
    String,                    // imap_pass
    bool,                      // imap_use_tls
    bool,                      // is_active
    Option<DateTime<Utc>>,     // last_synced_at
    DateTime<Utc>,             // created_at
);

const ACCOUNT_COLUMNS: &str = "id, email_address, imap_host, imap_port, imap_user, imap_pass, imap_use_tls, is_active, last_synced_at, created_at";

fn account_from_row(row: AccountRow) -> Account {
    let (id, email_address, host, port, username, password, use_tls, is_active, last_synced_at, created_at) =
        row;
    Account {
        id,
        email_address,
        imap: ImapConfig {
            host,
            port: port as u16,
            username,
            password,
            use_tls,
        },
        is_active,
        last_synced_at,
        created_at,
    }
}

#[async_trait]
impl AccountRepository for SqliteStore {
    async fn get(&self, account_id: &str) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row)
            .ok_or_else(|| StoreError::NotFound(account_id.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE is_active = 1 ORDER BY id",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(account_from_row).collect())
    }

    async fn update_last_synced(
        &self,
        account_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET last_synced_at = ? WHERE id = ?")
            .bind(timestamp)
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn exists(&self, message_id: &str) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM emails WHERE message_id = ?)",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(found != 0)
    }

    async fn insert(&self, message: &EmailMessage) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO emails
                (message_id, account_id, from_address, to_addresses, subject, body, folder, category, received_at, is_read)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id) DO NOTHING
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.account_id)
        .bind(&message.from_address)
        .bind(message.to_addresses.join(", "))
        .bind(&message.subject)
        .bind(&message.body)
        .bind(&message.folder)
        .bind(message.category.as_str())
        .bind(message.received_at)
        .bind(message.is_read)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Conflict)
        } else {
            Ok(InsertOutcome::Created)
        }
    }
}
