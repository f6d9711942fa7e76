use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single mailbox every account syncs against.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Message bodies are capped at this many bytes before classification
/// and persistence.
pub const MAX_BODY_BYTES: usize = 5_000;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

impl ImapConfig {
    /// Checks the fields a connection cannot be attempted without.
    /// Returns the name of the first missing field.
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.host.trim().is_empty() {
            return Some("host");
        }
        if self.port == 0 {
            return Some("port");
        }
        if self.username.trim().is_empty() {
            return Some("username");
        }
        if self.password.is_empty() {
            return Some("password");
        }
        None
    }
}

/// A synced mailbox account. The mailbox address doubles as the stable
/// account id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email_address: String,
    pub imap: ImapConfig,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Fixed categorization outcome for every ingested message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Interested,
    #[serde(rename = "Meeting Booked")]
    MeetingBooked,
    #[serde(rename = "Not Interested")]
    NotInterested,
    Spam,
    #[serde(rename = "Out of Office")]
    OutOfOffice,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Interested" => Ok(Category::Interested),
            "Meeting Booked" => Ok(Category::MeetingBooked),
            "Not Interested" => Ok(Category::NotInterested),
            "Spam" => Ok(Category::Spam),
            "Out of Office" => Ok(Category::OutOfOffice),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Canonical persisted record for one unique message.
///
/// Created exactly once per dedup key by the ingestion pipeline and
/// never mutated by the sync engine afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub message_id: String,
    pub account_id: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub folder: String,
    pub category: Category,
    pub is_read: bool,
}

/// Truncates a body to [`MAX_BODY_BYTES`], backing up to the nearest
/// char boundary so the result stays valid UTF-8.
pub fn truncate_body(mut body: String) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body;
    }
    let mut end = MAX_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
    body
}
