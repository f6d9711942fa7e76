use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use chrono::Utc;

use crate::models::{Account, ImapConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string() }
    }
}

/// Tuning knobs for the per-account sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mailbox: String,
    pub lookback_days: i64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub reconnect_delay_secs: u64,
    pub reconnect_retry_delay_secs: u64,
    pub idle_window_secs: u64,
    pub login_timeout_secs: u64,
}

impl SyncConfig {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the search backend. Indexing is disabled when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_search_index")]
    pub index: String,
}

fn default_search_index() -> String {
    "emails".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// One account seeded from configuration at daemon start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub email_address: String,
    pub imap: ImapConfig,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl AccountConfig {
    pub fn into_account(self) -> Account {
        Account {
            id: self.email_address.clone(),
            email_address: self.email_address,
            imap: self.imap,
            is_active: self.is_active,
            last_synced_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub log: LogConfig,
    pub database_url: String,
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Settings {
    pub fn new(config_path: Option<&str>) -> Result<Self, SettingsError> {
        // Default configuration values
        let mut config_builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("database_url", "sqlite:data/onebox.db?mode=rwc")?
            // Sync defaults
            .set_default("sync.mailbox", "INBOX")?
            .set_default("sync.lookback_days", 30)?
            .set_default("sync.batch_size", 10)?
            .set_default("sync.batch_pause_ms", 500)?
            .set_default("sync.reconnect_delay_secs", 5)?
            .set_default("sync.reconnect_retry_delay_secs", 30)?
            .set_default("sync.idle_window_secs", 1740)?
            .set_default("sync.login_timeout_secs", 30)?;

        // Add configuration from file
        if let Some(path) = config_path {
            config_builder = config_builder.add_source(File::with_name(path));
        }

        // Add environment variables with prefix
        // e.g. `ONEBOX_SYNC__BATCH_SIZE=...` would override `sync.batch_size`
        config_builder = config_builder.add_source(
            Environment::with_prefix("ONEBOX")
                .separator("__")
                .ignore_empty(true),
        );

        // Add direct environment variables for important settings
        let env_vars = [
            ("DATABASE_URL", "database_url"),
            ("ELASTICSEARCH_URL", "search.url"),
            ("ELASTICSEARCH_INDEX", "search.index"),
            ("SLACK_WEBHOOK_URL", "notify.slack_webhook_url"),
            ("WEBHOOK_URL", "notify.webhook_url"),
        ];

        for (env_var, config_key) in &env_vars {
            if let Ok(value) = env::var(env_var) {
                config_builder = config_builder.set_override(*config_key, value)?;
            }
        }

        // Build the config and deserialize it into Settings
        config_builder.build()?.try_deserialize().map_err(Into::into)
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load or parse configuration: {0}")]
    Load(#[from] config::ConfigError),
}
