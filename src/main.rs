//! oneboxd: multi-account mailbox sync daemon.
//!
//! Loads configuration, seeds accounts into the local store, starts
//! one sync supervisor per active account and runs until interrupted.

use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use onebox::classify::KeywordClassifier;
use onebox::config::Settings;
use onebox::imap::ImapTransport;
use onebox::ingest::IngestPipeline;
use onebox::notify::WebhookDispatcher;
use onebox::search::{ElasticIndexer, NullIndexer, SearchIndexer};
use onebox::store::{AccountRepository, SqliteStore};
use onebox::sync::SyncEngine;

#[derive(Parser)]
#[command(name = "oneboxd", about = "Multi-account mailbox sync daemon")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "ONEBOX_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;

    env_logger::init_from_env(
        env_logger::Env::new().default_filter_or(settings.log.level.as_str()),
    );
    info!("starting oneboxd");

    // The store is load-bearing; without it there is nothing to do.
    let store = Arc::new(SqliteStore::connect(&settings.database_url).await?);
    info!("connected to database: {}", settings.database_url);

    for account_config in settings.accounts.clone() {
        let account = account_config.into_account();
        if let Err(e) = store.upsert_account(&account).await {
            error!("failed to register account {}: {}", account.id, e);
        }
    }

    // Search is optional; the daemon runs without it.
    let indexer: Arc<dyn SearchIndexer> = match settings.search.url.clone() {
        Some(url) => {
            let indexer = ElasticIndexer::new(url, settings.search.index.clone());
            if let Err(e) = indexer.ensure_index().await {
                warn!("search index bootstrap failed, continuing anyway: {}", e);
            }
            Arc::new(indexer)
        }
        None => {
            info!("no search backend configured, indexing disabled");
            Arc::new(NullIndexer)
        }
    };

    let notifier = Arc::new(WebhookDispatcher::new(
        settings.notify.slack_webhook_url.clone(),
        settings.notify.webhook_url.clone(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        Arc::new(KeywordClassifier),
        indexer,
        notifier,
    ));
    let transport = Arc::new(ImapTransport::new(settings.sync.login_timeout()));
    let engine = Arc::new(SyncEngine::new(
        transport,
        store.clone(),
        pipeline,
        (&settings.sync).into(),
    ));

    let accounts = store.list_active().await?;
    if accounts.is_empty() {
        warn!("no active accounts configured, nothing to sync");
    }
    for account in &accounts {
        if let Err(e) = engine.start(&account.id).await {
            // configuration errors are operator problems, not retried
            error!("failed to start sync for {}: {}", account.id, e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping supervisors");
    engine.stop_all().await;
    info!("oneboxd stopped");
    Ok(())
}
