use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::TransportError;
use crate::models::Account;

/// One message as fetched from the server, before any parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Server-assigned identifier within the selected mailbox.
    pub uid: u32,
    /// Full transport payload (headers + body).
    pub body: Vec<u8>,
    pub internal_date: Option<DateTime<Utc>>,
}

/// Push-style session notifications, surfaced as an explicit event
/// stream instead of registered callbacks. The consuming control loop
/// translates each event directly into a state-machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server announced new mail. `count` is what the server
    /// reported; the unseen search is the authoritative bound.
    NewMail { count: u32 },
    /// The idle window elapsed without activity.
    KeepAlive,
    /// The server ended the session.
    Closed,
}

/// A live, authenticated session against one account's mailbox.
///
/// `&mut self` throughout: a session has exactly one owner (the
/// account's supervisor task) and is never shared.
#[async_trait]
pub trait MailSession: Send {
    async fn select_mailbox(&mut self, name: &str) -> Result<(), TransportError>;

    /// UIDs of all messages received since the given instant, in
    /// ascending server order.
    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<u32>, TransportError>;

    /// UIDs of all messages not yet marked seen, in ascending server
    /// order.
    async fn search_unseen(&mut self) -> Result<Vec<u32>, TransportError>;

    /// Fetches the given UIDs. Results follow server order within the
    /// batch; UIDs the server no longer knows are silently absent.
    async fn fetch_batch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, TransportError>;

    /// Blocks until the server pushes something or `idle_window`
    /// elapses.
    async fn next_event(&mut self, idle_window: Duration) -> Result<SessionEvent, TransportError>;

    /// Logs out and drops the connection. Safe to call more than once;
    /// only the first call talks to the server.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for [`MailSession`]s. The only component allowed to call
/// this is the supervisor layer.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Box<dyn MailSession>, TransportError>;
}
