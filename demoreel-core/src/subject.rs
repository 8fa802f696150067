use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::debug;

/// Best-effort display-name lookup for video titles and result records.
/// Implementations never fail a job: any problem yields `None`.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, subject_id: &str) -> Option<String>;
}

/// Scrapes the subject's public community profile for a display name.
pub struct SteamProfileResolver {
    client: Client,
    base_url: String,
}

impl SteamProfileResolver {
    pub fn new(request_timeout: Duration) -> Option<Self> {
        let client = Client::builder()
            .user_agent("demoreel/0.1")
            .timeout(request_timeout)
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: "https://steamcommunity.com".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl NameResolver for SteamProfileResolver {
    async fn display_name(&self, subject_id: &str) -> Option<String> {
        let url = format!("{}/profiles/{}/?xml=1", self.base_url, subject_id);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(%error, subject_id, "profile lookup failed");
                return None;
            }
        };
        let body = match response.error_for_status() {
            Ok(response) => response.text().await.ok()?,
            Err(error) => {
                debug!(%error, subject_id, "profile lookup rejected");
                return None;
            }
        };
        let regex = Regex::new(r"<steamID><!\[CDATA\[(.*?)\]\]></steamID>").ok()?;
        let name = regex
            .captures(&body)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty());
        if name.is_none() {
            debug!(subject_id, "profile carried no display name");
        }
        name
    }
}

/// Resolver that never knows anyone; keeps the pipeline independent of the
/// community service when lookups are unwanted.
#[derive(Debug, Default)]
pub struct NoNameResolver;

#[async_trait]
impl NameResolver for NoNameResolver {
    async fn display_name(&self, _subject_id: &str) -> Option<String> {
        None
    }
}
