mod sharecode;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;

pub use sharecode::{extract_share_code, is_demo_url};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no well-formed share code or demo URL in {0:?}")]
    InvalidReference(String),
    #[error("replay is no longer retrievable: {0}")]
    Expired(String),
    #[error("resolution service unavailable: {0}")]
    Unavailable(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("http client error: {0}")]
    Client(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type FetchResult<T> = Result<T, FetchError>;

/// How a submitted target reference is to be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    DirectUrl(String),
    ShareCode(String),
}

/// Classifies free text as a direct download URL or a share code.
pub fn classify_target(reference: &str) -> FetchResult<Target> {
    if is_demo_url(reference) {
        return Ok(Target::DirectUrl(reference.trim().to_string()));
    }
    extract_share_code(reference)
        .map(Target::ShareCode)
        .ok_or_else(|| FetchError::InvalidReference(reference.to_string()))
}

/// The acquisition seam the orchestrator depends on: a target reference in,
/// a local `.dem` path out.
#[async_trait]
pub trait DemoSource: Send + Sync {
    async fn fetch(&self, target_reference: &str) -> FetchResult<PathBuf>;
}

/// Turns a share code into a download URL by asking an ordered list of
/// resolution endpoints; the first one that answers with a link wins.
#[derive(Clone)]
pub struct ShareCodeResolver {
    client: Client,
    endpoints: Vec<String>,
}

impl ShareCodeResolver {
    pub fn new(endpoints: Vec<String>, request_timeout: Duration) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent("demoreel/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        Ok(Self { client, endpoints })
    }

    pub async fn resolve(&self, share_code: &str) -> FetchResult<String> {
        for endpoint in &self.endpoints {
            match self.try_endpoint(endpoint, share_code).await {
                Ok(Some(url)) => {
                    info!(endpoint = %endpoint, "resolved share code to download link");
                    return Ok(url);
                }
                Ok(None) => {
                    warn!(endpoint = %endpoint, "endpoint did not return a download link");
                }
                Err(FetchError::Expired(reason)) => return Err(FetchError::Expired(reason)),
                Err(error) => {
                    warn!(endpoint = %endpoint, %error, "resolution endpoint failed");
                }
            }
        }
        Err(FetchError::Unavailable(format!(
            "no endpoint could resolve share code {share_code}"
        )))
    }

    async fn try_endpoint(&self, endpoint: &str, share_code: &str) -> FetchResult<Option<String>> {
        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "shareCode": share_code }))
            .send()
            .await
            .map_err(|err| FetchError::Unavailable(err.to_string()))?;

        if response.status() == StatusCode::GONE {
            return Err(FetchError::Expired(format!(
                "resolution service reports the replay for {share_code} is gone"
            )));
        }
        let response = response
            .error_for_status()
            .map_err(|err| FetchError::Unavailable(err.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| FetchError::Unavailable(err.to_string()))?;

        if let Some(error) = body.get("error").and_then(|value| value.as_str()) {
            if error.to_ascii_lowercase().contains("expir") {
                return Err(FetchError::Expired(error.to_string()));
            }
            warn!(endpoint = %endpoint, error, "resolution endpoint returned an error");
            return Ok(None);
        }
        Ok(body
            .get("downloadLink")
            .and_then(|value| value.as_str())
            .map(str::to_string))
    }
}

/// Downloads and inflates replay files into the demo directory.
///
/// Idempotent by filename: a `.dem` already present at the derived
/// destination is returned as-is without re-fetching.
pub struct DemoFetcher {
    resolver: ShareCodeResolver,
    client: Client,
    demo_dir: PathBuf,
}

impl DemoFetcher {
    pub fn new(
        resolver: ShareCodeResolver,
        demo_dir: impl Into<PathBuf>,
        request_timeout: Duration,
    ) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent("demoreel/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|err| FetchError::Client(err.to_string()))?;
        Ok(Self {
            resolver,
            client,
            demo_dir: demo_dir.into(),
        })
    }

    /// Fetches a previously resolved download URL. The `.dem` filename is
    /// derived from the URL; `fallback_stem` covers URLs without one.
    pub async fn download(&self, download_url: &str, fallback_stem: &str) -> FetchResult<PathBuf> {
        let remote_name = remote_file_name(download_url);
        let (archive_name, demo_name) = match remote_name {
            Some(name) if name.ends_with(".dem.bz2") => {
                let demo = name.trim_end_matches(".bz2").to_string();
                (Some(name), demo)
            }
            Some(name) if name.ends_with(".dem") => (None, name),
            _ => {
                warn!(url = %download_url, "could not derive a demo filename from the URL");
                (
                    Some(format!("{fallback_stem}.dem.bz2")),
                    format!("{fallback_stem}.dem"),
                )
            }
        };

        let demo_path = self.demo_dir.join(&demo_name);
        if demo_path.exists() {
            info!(path = %demo_path.display(), "demo already present, skipping download");
            return Ok(demo_path);
        }
        fs::create_dir_all(&self.demo_dir)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: self.demo_dir.clone(),
            })?;

        match archive_name {
            Some(archive_name) => {
                let archive_path = self.demo_dir.join(&archive_name);
                self.fetch_to_file(download_url, &archive_path).await?;
                info!(path = %archive_path.display(), "download complete, inflating");
                inflate_bz2(&archive_path, &demo_path)?;
                if let Err(error) = std::fs::remove_file(&archive_path) {
                    warn!(path = %archive_path.display(), %error, "failed to remove compressed file");
                }
            }
            None => {
                self.fetch_to_file(download_url, &demo_path).await?;
            }
        }
        info!(path = %demo_path.display(), "demo ready");
        Ok(demo_path)
    }

    async fn fetch_to_file(&self, url: &str, path: &Path) -> FetchResult<()> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let source_path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::Download("invalid file url".into()))?;
                fs::copy(&source_path, path)
                    .await
                    .map_err(|source| FetchError::Io {
                        source,
                        path: path.to_path_buf(),
                    })?;
                return Ok(());
            }
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Download(err.to_string()))?
            .error_for_status()
            .map_err(|err| FetchError::Download(err.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(path)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: path.to_path_buf(),
            })?;
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|err| FetchError::Download(err.to_string()))?;
            file.write_all(&data)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: path.to_path_buf(),
                })?;
        }
        file.flush().await.map_err(|source| FetchError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl DemoSource for DemoFetcher {
    async fn fetch(&self, target_reference: &str) -> FetchResult<PathBuf> {
        let (download_url, fallback_stem) = match classify_target(target_reference)? {
            Target::DirectUrl(url) => (url, format!("demo_{}", Utc::now().timestamp())),
            Target::ShareCode(code) => {
                let url = self.resolver.resolve(&code).await?;
                (url, code)
            }
        };
        self.download(&download_url, &fallback_stem).await
    }
}

fn remote_file_name(download_url: &str) -> Option<String> {
    let parsed = Url::parse(download_url).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn inflate_bz2(archive: &Path, destination: &Path) -> FetchResult<()> {
    let input = std::fs::File::open(archive).map_err(|source| FetchError::Io {
        source,
        path: archive.to_path_buf(),
    })?;
    let mut decoder = bzip2::read::BzDecoder::new(input);
    let mut output = std::fs::File::create(destination).map_err(|source| FetchError::Io {
        source,
        path: destination.to_path_buf(),
    })?;
    std::io::copy(&mut decoder, &mut output).map_err(|err| {
        FetchError::Download(format!(
            "failed to inflate {}: {err}",
            archive.display()
        ))
    })?;
    Ok(())
}
