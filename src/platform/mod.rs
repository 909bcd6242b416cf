pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// A link rendered as a single button under the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationLink {
    pub text: String,
    pub url: reqwest::Url,
}

/// What gets sent to every recipient when the deck list changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub text: String,
    pub link: Option<NotificationLink>,
}

/// Delivery of a notification to one chat
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send(&self, chat_id: i64, payload: &NotificationPayload) -> Result<()>;
}
