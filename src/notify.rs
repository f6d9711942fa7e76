//! Downstream notification collaborator.
//!
//! Invoked by the pipeline for `Interested` messages only. Channels
//! fail independently: a broken Slack hook never blocks the external
//! webhook, and neither failure reaches the pipeline's outcome.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Category, EmailMessage};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, message: &EmailMessage, category: Category) -> Result<(), NotifyError>;
}

fn snippet(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Fans out to an optional Slack incoming webhook and an optional
/// generic webhook URL.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    slack_webhook_url: Option<String>,
    webhook_url: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(slack_webhook_url: Option<String>, webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            slack_webhook_url,
            webhook_url,
        }
    }

    async fn send_slack(&self, url: &str, message: &EmailMessage) -> Result<(), NotifyError> {
        let payload = json!({
            "text": "New Interested Email",
            "blocks": [
                {
                    "type": "header",
                    "text": { "type": "plain_text", "text": "New Interested Email" }
                },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*From:*\n{}", message.from_address) },
                        { "type": "mrkdwn", "text": format!("*Account:*\n{}", message.account_id) }
                    ]
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Subject:*\n{}", message.subject) }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Preview:*\n{}", snippet(&message.body, 200)) }
                }
            ]
        });

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "slack returned {}",
                response.status()
            )));
        }
        debug!("Slack notification sent for {}", message.message_id);
        Ok(())
    }

    async fn send_webhook(
        &self,
        url: &str,
        message: &EmailMessage,
        category: Category,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "id": Uuid::new_v4(),
            "event": "email_categorized",
            "category": category.as_str(),
            "timestamp": Utc::now(),
            "data": {
                "messageId": message.message_id,
                "from": message.from_address,
                "to": message.to_addresses,
                "subject": message.subject,
                "date": message.received_at,
                "folder": message.folder,
                "accountId": message.account_id,
                "snippet": snippet(&message.body, 100)
            }
        });

        let response = self
            .client
            .post(url)
            .header("X-Webhook-Source", "onebox")
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        debug!("external webhook triggered for {}", message.message_id);
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn notify(&self, message: &EmailMessage, category: Category) -> Result<(), NotifyError> {
        match &self.slack_webhook_url {
            Some(url) => {
                if let Err(e) = self.send_slack(url, message).await {
                    warn!("Slack notification failed for {}: {}", message.message_id, e);
                }
            }
            None => debug!("Slack webhook not configured, skipping"),
        }

        match &self.webhook_url {
            Some(url) => {
                if let Err(e) = self.send_webhook(url, message, category).await {
                    warn!("external webhook failed for {}: {}", message.message_id, e);
                }
            }
            None => debug!("external webhook not configured, skipping"),
        }

        Ok(())
    }
}
