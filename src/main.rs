mod config;
mod platform;
mod scheduler;
mod source;
mod storage;
mod updater;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::telegram::TelegramBroadcaster;
use crate::scheduler::Scheduler;
use crate::source::SiteFetcher;
use crate::storage::json::JsonFileStore;
use crate::storage::Storage;
use crate::updater::{NotificationTemplate, UpdateJob};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,deckwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Source: {}", config.source.url);
    info!("  Label: {:?}", config.source.label);
    info!("  Data directory: {}", config.storage.data_dir.display());
    info!("  Check interval: {:?}", config.schedule.interval());

    let bot = Bot::new(&config.telegram.bot_token);

    let storage: Arc<dyn Storage> = Arc::new(JsonFileStore::new(
        config.storage.marker_path(),
        config.storage.recipients_path(),
    ));
    let fetcher = SiteFetcher::new(&config.source)?;
    let broadcaster = TelegramBroadcaster::new(bot.clone(), config.telegram.send_timeout());

    let template = NotificationTemplate {
        message: config.notification.message_template.clone(),
        link: config.notification_link()?,
    };

    let job = Arc::new(UpdateJob::new(
        Arc::new(fetcher),
        storage.clone(),
        Arc::new(broadcaster),
        template,
    ));

    let mut scheduler = Scheduler::new().await?;
    crate::scheduler::tasks::register_update_check(&scheduler, job, &config.schedule).await?;
    scheduler.start().await?;

    info!("Bot is starting...");
    platform::telegram::run(bot, storage).await?;

    scheduler.shutdown().await?;
    Ok(())
}
