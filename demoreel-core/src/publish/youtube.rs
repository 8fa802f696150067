use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::{PublishError, PublishResult, Publisher};

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const DESCRIPTION: &str = "Suspected cheater highlights.";

/// Uploads artifacts to the hosting service with a stored OAuth token,
/// refreshing it through the token endpoint when it has gone stale.
pub struct YouTubePublisher {
    client: Client,
    token_file: PathBuf,
    privacy: String,
    category_id: String,
    token_endpoint: String,
    upload_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: Option<String>,
}

impl YouTubePublisher {
    pub fn new(
        token_file: impl Into<PathBuf>,
        privacy: impl Into<String>,
        category_id: impl Into<String>,
        request_timeout: Duration,
    ) -> PublishResult<Self> {
        let client = Client::builder()
            .user_agent("demoreel/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|err| PublishError::Network(err.to_string()))?;
        Ok(Self {
            client,
            token_file: token_file.into(),
            privacy: privacy.into(),
            category_id: category_id.into(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            upload_endpoint: UPLOAD_ENDPOINT.to_string(),
        })
    }

    /// Points the publisher at alternative service endpoints.
    pub fn with_endpoints(
        mut self,
        token_endpoint: impl Into<String>,
        upload_endpoint: impl Into<String>,
    ) -> Self {
        self.token_endpoint = token_endpoint.into();
        self.upload_endpoint = upload_endpoint.into();
        self
    }

    async fn load_token(&self) -> PublishResult<StoredToken> {
        let raw = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|source| PublishError::Io {
                source,
                path: self.token_file.clone(),
            })?;
        serde_json::from_str(&raw).map_err(|err| {
            PublishError::Credentials(format!(
                "could not decode token file {}: {err}",
                self.token_file.display()
            ))
        })
    }

    async fn access_token(&self) -> PublishResult<String> {
        let mut stored = self.load_token().await?;
        let fresh_enough = stored
            .expiry
            .map(|expiry| expiry > Utc::now() + ChronoDuration::seconds(60))
            .unwrap_or(false);
        if fresh_enough {
            if let Some(token) = stored.token.clone() {
                return Ok(token);
            }
        }

        let refresh_token = stored.refresh_token.clone().ok_or_else(|| {
            PublishError::Credentials("token is stale and no refresh token is stored".into())
        })?;
        let client_id = stored.client_id.clone().ok_or_else(|| {
            PublishError::Credentials("token file is missing client_id".into())
        })?;
        let client_secret = stored.client_secret.clone().ok_or_else(|| {
            PublishError::Credentials("token file is missing client_secret".into())
        })?;

        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|err| PublishError::Credentials(err.to_string()))?;
        let refreshed: RefreshResponse = response.json().await?;

        stored.token = Some(refreshed.access_token.clone());
        stored.expiry = Some(Utc::now() + ChronoDuration::seconds(refreshed.expires_in));
        match serde_json::to_vec_pretty(&stored) {
            Ok(payload) => {
                if let Err(error) = tokio::fs::write(&self.token_file, payload).await {
                    warn!(path = %self.token_file.display(), %error, "failed to persist refreshed token");
                }
            }
            Err(error) => warn!(%error, "failed to serialize refreshed token"),
        }
        Ok(refreshed.access_token)
    }

    async fn open_session(&self, access_token: &str, title: &str) -> PublishResult<String> {
        let metadata = serde_json::json!({
            "snippet": {
                "title": title,
                "description": DESCRIPTION,
                "tags": ["csgo", "cheater", "highlights"],
                "categoryId": self.category_id,
            },
            "status": { "privacyStatus": self.privacy },
        });
        let response = self
            .client
            .post(&self.upload_endpoint)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(access_token)
            .json(&metadata)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| PublishError::Upload(err.to_string()))?;
        response
            .headers()
            .get("Location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::Upload("upload session response carried no Location header".into())
            })
    }

    async fn upload_file(
        &self,
        session_uri: &str,
        access_token: &str,
        artifact: &Path,
    ) -> PublishResult<InsertResponse> {
        let file = tokio::fs::File::open(artifact)
            .await
            .map_err(|source| PublishError::Io {
                source,
                path: artifact.to_path_buf(),
            })?;
        let size = file
            .metadata()
            .await
            .map_err(|source| PublishError::Io {
                source,
                path: artifact.to_path_buf(),
            })?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .client
            .put(session_uri)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| PublishError::Upload(err.to_string()))?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    async fn publish(&self, artifact: &Path, title: &str) -> PublishResult<String> {
        let access_token = self.access_token().await?;
        info!(artifact = %artifact.display(), title, "starting upload");
        let session_uri = self.open_session(&access_token, title).await?;
        let inserted = self.upload_file(&session_uri, &access_token, artifact).await?;
        let video_id = inserted
            .id
            .ok_or_else(|| PublishError::Upload("upload response carried no video id".into()))?;
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        info!(%url, "upload finished");
        Ok(url)
    }
}
