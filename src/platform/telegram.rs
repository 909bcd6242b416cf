use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::{debug, error, info};

use super::{Broadcaster, NotificationLink, NotificationPayload};
use crate::storage::{RecipientRecord, Storage};

/// Sends notifications through the Telegram Bot API
pub struct TelegramBroadcaster {
    bot: Bot,
    timeout: Duration,
}

impl TelegramBroadcaster {
    pub fn new(bot: Bot, timeout: Duration) -> Self {
        Self { bot, timeout }
    }
}

fn link_keyboard(link: &NotificationLink) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        link.text.clone(),
        link.url.clone(),
    )]])
}

#[async_trait]
impl Broadcaster for TelegramBroadcaster {
    async fn send(&self, chat_id: i64, payload: &NotificationPayload) -> Result<()> {
        let mut request = self.bot.send_message(ChatId(chat_id), payload.text.clone());
        if let Some(link) = &payload.link {
            request = request.reply_markup(link_keyboard(link));
        }

        tokio::time::timeout(self.timeout, async move { request.await })
            .await
            .with_context(|| format!("Timed out after {:?}", self.timeout))?
            .context("Telegram rejected the message")?;
        Ok(())
    }
}

/// Run the Telegram dispatcher.
///
/// The bot answers nothing: every chat that sends it a message (or posts in a
/// channel it administers) is added to the recipient list. Returns on Ctrl-C.
pub async fn run(bot: Bot, storage: Arc<dyn Storage>) -> Result<()> {
    info!("Starting Telegram dispatcher...");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(register_chat))
        .branch(Update::filter_channel_post().endpoint(register_chat));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![storage])
        .default_handler(|upd| async move {
            debug!("Ignoring update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram dispatcher stopped");
    Ok(())
}

async fn register_chat(msg: Message, storage: Arc<dyn Storage>) -> ResponseResult<()> {
    match storage.add_recipient(recipient_from_message(&msg)).await {
        Ok(true) => info!("New recipient: chat {}", msg.chat.id.0),
        Ok(false) => {}
        Err(e) => error!("Failed to register chat {}: {:#}", msg.chat.id.0, e),
    }
    Ok(())
}

fn recipient_from_message(msg: &Message) -> RecipientRecord {
    let chat = &msg.chat;
    let kind = if chat.is_private() {
        "private"
    } else if chat.is_group() {
        "group"
    } else if chat.is_supergroup() {
        "supergroup"
    } else {
        "channel"
    };

    let mut record = RecipientRecord::new(chat.id.0)
        .with_meta("type", kind)
        .with_meta("registered_at", Utc::now().to_rfc3339());
    if let Some(title) = chat.title() {
        record = record.with_meta("title", title);
    }
    if let Some(username) = chat.username() {
        record = record.with_meta("username", username);
    }
    if let Some(first_name) = chat.first_name() {
        record = record.with_meta("first_name", first_name);
    }
    record
}
