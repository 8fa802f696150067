mod youtube;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use youtube::YouTubePublisher;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<reqwest::Error> for PublishError {
    fn from(error: reqwest::Error) -> Self {
        PublishError::Network(error.to_string())
    }
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Hands a finished artifact to the hosting service and returns its public
/// URL. The service's internals stay opaque to the pipeline.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, artifact: &Path, title: &str) -> PublishResult<String>;
}
