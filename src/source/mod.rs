pub mod html;

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;

/// Freshness token scraped from the deck page. Compared by equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UpdateMarker(String);

impl UpdateMarker {
    /// Trimmed marker, or `None` for blank input.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UpdateMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UpdateMarker {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| "update marker must not be blank".to_string())
    }
}

impl From<UpdateMarker> for String {
    fn from(marker: UpdateMarker) -> Self {
        marker.0
    }
}

/// Anything that can report the current marker of the remote list.
///
/// Implementations fail soft: every error is logged and reported as `None`.
#[async_trait]
pub trait MarkerSource: Send + Sync {
    async fn fetch_marker(&self) -> Option<UpdateMarker>;
}

/// Scrapes the marker from the configured deck page over HTTP.
pub struct SiteFetcher {
    client: reqwest::Client,
    url: String,
    label: String,
    element: Option<String>,
}

impl SiteFetcher {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            label: config.label.clone(),
            element: config.element_filter().map(str::to_string),
        })
    }

    async fn fetch_page(&self) -> Result<String> {
        debug!("Fetching deck page: {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Deck page returned HTTP {}", status);
        }

        response
            .text()
            .await
            .context("Failed to read deck page body")
    }
}

#[async_trait]
impl MarkerSource for SiteFetcher {
    async fn fetch_marker(&self) -> Option<UpdateMarker> {
        let page = match self.fetch_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("Could not fetch the deck page: {:#}", e);
                return None;
            }
        };

        match html::extract_marker(&page, &self.label, self.element.as_deref())
            .and_then(UpdateMarker::new)
        {
            Some(marker) => {
                info!("Found update marker on the deck page: {}", marker);
                Some(marker)
            }
            None => {
                warn!(
                    "No '{}' marker found on the deck page (element: {})",
                    self.label,
                    self.element.as_deref().unwrap_or("any")
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn source_config(url: String) -> SourceConfig {
        SourceConfig {
            url,
            label: "Updated:".to_string(),
            element: "figcaption".to_string(),
            timeout_secs: 1,
            user_agent: "deckwatch-test".to_string(),
        }
    }

    /// Serve a single canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{status_line}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/decks")
    }

    #[test]
    fn test_marker_trims_and_rejects_blank() {
        assert_eq!(UpdateMarker::new("  2024-01-01 ").unwrap().as_str(), "2024-01-01");
        assert!(UpdateMarker::new("   ").is_none());
    }

    #[test]
    fn test_marker_serde_rejects_blank() {
        let marker: UpdateMarker = serde_json::from_str("\"v1\"").unwrap();
        assert_eq!(marker.to_string(), "v1");
        assert!(serde_json::from_str::<UpdateMarker>("\"  \"").is_err());
    }

    #[tokio::test]
    async fn test_fetch_marker_from_page() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            "<figure><figcaption>Updated: 2024-02-10</figcaption></figure>",
        )
        .await;
        let fetcher = SiteFetcher::new(&source_config(url)).unwrap();

        let marker = fetcher.fetch_marker().await;
        assert_eq!(marker, UpdateMarker::new("2024-02-10"));
    }

    #[tokio::test]
    async fn test_fetch_marker_missing_label() {
        let url = serve_once("HTTP/1.1 200 OK", "<p>nothing to see</p>").await;
        let fetcher = SiteFetcher::new(&source_config(url)).unwrap();

        assert!(fetcher.fetch_marker().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_marker_http_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable",
            "<figcaption>Updated: stale</figcaption>",
        )
        .await;
        let fetcher = SiteFetcher::new(&source_config(url)).unwrap();

        assert!(fetcher.fetch_marker().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_marker_timeout() {
        // Accept the connection but never answer.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let fetcher = SiteFetcher::new(&source_config(format!("http://{addr}/"))).unwrap();
        assert!(fetcher.fetch_marker().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_marker_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = SiteFetcher::new(&source_config(format!("http://{addr}/"))).unwrap();
        assert!(fetcher.fetch_marker().await.is_none());
    }
}
