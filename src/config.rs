use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::NotificationLink;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Page that publishes the deck list
    pub url: String,
    /// Text that precedes the updated-on marker
    #[serde(default = "default_label")]
    pub label: String,
    /// Only look for the label inside this element; empty means anywhere
    #[serde(default = "default_element")]
    pub element: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// `{marker}` is replaced with the new updated-on value
    #[serde(default = "default_message_template")]
    pub message_template: String,
    /// Button caption. An empty string sends the message without a button.
    #[serde(default = "default_link_text")]
    pub link_text: String,
    /// Button target, falls back to the source URL
    #[serde(default)]
    pub link_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_first_run_secs")]
    pub first_run_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_marker_file")]
    pub marker_file: String,
    #[serde(default = "default_recipients_file")]
    pub recipients_file: String,
}

fn default_send_timeout_secs() -> u64 {
    15
}

fn default_label() -> String {
    "Updated:".to_string()
}

fn default_element() -> String {
    "figcaption".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_message_template() -> String {
    "📢 The Marvel Snap meta was updated ({marker})!\nCheck out the new decks:".to_string()
}

fn default_link_text() -> String {
    "View updated decks".to_string()
}

fn default_interval_secs() -> u64 {
    1800
}

fn default_first_run_secs() -> u64 {
    10
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_marker_file() -> String {
    "last_updated.json".to_string()
}

fn default_recipients_file() -> String {
    "chat_ids.json".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            message_template: default_message_template(),
            link_text: default_link_text(),
            link_url: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            first_run_secs: default_first_run_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            marker_file: default_marker_file(),
            recipients_file: default_recipients_file(),
        }
    }
}

impl TelegramConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Element filter for the scraper, `None` when any element will do.
    pub fn element_filter(&self) -> Option<&str> {
        let element = self.element.trim();
        if element.is_empty() {
            None
        } else {
            Some(element)
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn first_run(&self) -> Duration {
        Duration::from_secs(self.first_run_secs)
    }
}

impl StorageConfig {
    pub fn marker_path(&self) -> PathBuf {
        self.data_dir.join(&self.marker_file)
    }

    pub fn recipients_path(&self) -> PathBuf {
        self.data_dir.join(&self.recipients_file)
    }
}

impl Config {
    /// Button shown under announcements, `None` when `link_text` is empty.
    /// The target is `link_url`, or the source page when that is unset.
    pub fn notification_link(&self) -> Result<Option<NotificationLink>> {
        if self.notification.link_text.is_empty() {
            return Ok(None);
        }
        let raw = self
            .notification
            .link_url
            .as_deref()
            .unwrap_or(&self.source.url);
        let url = reqwest::Url::parse(raw)
            .with_context(|| format!("Invalid notification link URL: {}", raw))?;
        Ok(Some(NotificationLink {
            text: self.notification.link_text.clone(),
            url,
        }))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)?;

        if !config.storage.data_dir.exists() {
            std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    config.storage.data_dir.display()
                )
            })?;
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token must not be empty");
        }
        if self.telegram.send_timeout_secs == 0 {
            anyhow::bail!("telegram.send_timeout_secs must be greater than zero");
        }
        if self.source.url.trim().is_empty() {
            anyhow::bail!("source.url must not be empty");
        }
        let source_url = reqwest::Url::parse(&self.source.url)
            .with_context(|| format!("Invalid source.url: {}", self.source.url))?;
        if !matches!(source_url.scheme(), "http" | "https") {
            anyhow::bail!("source.url must be an http(s) URL, got {}", self.source.url);
        }
        if self.source.label.trim().is_empty() {
            anyhow::bail!("source.label must not be empty");
        }
        if self.source.timeout_secs == 0 {
            anyhow::bail!("source.timeout_secs must be greater than zero");
        }
        if self.schedule.interval_secs == 0 {
            anyhow::bail!("schedule.interval_secs must be greater than zero");
        }
        if self.storage.marker_file.is_empty() || self.storage.recipients_file.is_empty() {
            anyhow::bail!("storage file names must not be empty");
        }
        if self.storage.marker_path() == self.storage.recipients_path() {
            anyhow::bail!(
                "storage.marker_file and storage.recipients_file must be different files"
            );
        }
        self.notification_link()?;
        Ok(())
    }
}
