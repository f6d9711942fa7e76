//! Library core for onebox.
//!
//! The sync engine lives in [`sync`]; everything it talks to (mail
//! transport, message store, classifier, search indexer, notification
//! dispatcher) is a trait seam with a default implementation in the
//! corresponding module.

pub mod classify;
pub mod config;
pub mod imap;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod search;
pub mod store;
pub mod sync;

// CONSOLIDATED PRELUDE
pub mod prelude {
    // Config
    pub use crate::config::Settings;

    // IMAP transport seam
    pub use crate::imap::error::TransportError;
    pub use crate::imap::transport::{MailSession, MailTransport, RawMessage, SessionEvent};

    // Pipeline and collaborators
    pub use crate::classify::{Classifier, KeywordClassifier};
    pub use crate::ingest::{IngestOutcome, IngestPipeline};
    pub use crate::models::{Account, Category, EmailMessage, ImapConfig};
    pub use crate::notify::{NotificationDispatcher, NotifyError};
    pub use crate::search::{IndexError, SearchIndexer};
    pub use crate::store::{AccountRepository, InsertOutcome, MessageStore, StoreError};

    // Sync engine
    pub use crate::sync::{SupervisorState, SyncEngine, SyncError, SyncSettings, SyncStatus};

    // Common Libs
    pub use log::{debug, error, info, trace, warn};
    pub use std::sync::Arc;
}
