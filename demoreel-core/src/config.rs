use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DemoreelConfig {
    pub paths: PathsSection,
    pub resolver: ResolverSection,
    pub tool: ToolSection,
    pub playback: PlaybackSection,
    pub recorder: RecorderSection,
    pub capture: CaptureSection,
    pub publish: PublishSection,
    pub results: ResultsSection,
}

impl DemoreelConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| ConfigError::Invalid {
            reason: reason.to_string(),
            path: path.to_path_buf(),
        };
        if self.resolver.endpoints.is_empty() {
            return Err(invalid("resolver.endpoints must not be empty"));
        }
        if self.results.capacity == 0 {
            return Err(invalid("results.capacity must be greater than zero"));
        }
        if self.playback.poll_interval_ms == 0 {
            return Err(invalid("playback.poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub demo_dir: String,
    pub results_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSection {
    pub endpoints: Vec<String>,
    pub request_timeout_seconds: u64,
}

impl ResolverSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSection {
    pub dir: String,
    pub program: String,
    pub entrypoint: String,
    pub analysis_timeout_seconds: u64,
}

impl ToolSection {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackSection {
    pub process_name: String,
    pub ready_timeout_seconds: u64,
    /// Compensates for game-engine load time between the process appearing
    /// and the first highlight actually rendering.
    pub launch_settle_seconds: u64,
    pub finish_timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

impl PlaybackSection {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_secs(self.launch_settle_seconds)
    }

    pub fn finish_timeout(&self) -> Duration {
        Duration::from_secs(self.finish_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderSection {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub connect_timeout_seconds: u64,
}

impl RecorderSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    pub recording_dir: String,
    pub extension: String,
    /// How long the recorder gets to finish writing the file after
    /// stop-record before artifact discovery starts.
    pub stop_flush_seconds: u64,
}

impl CaptureSection {
    pub fn stop_flush(&self) -> Duration {
        Duration::from_secs(self.stop_flush_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishSection {
    pub upload_by_default: bool,
    pub token_file: String,
    pub privacy: String,
    pub category_id: String,
    pub request_timeout_seconds: u64,
}

impl PublishSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsSection {
    pub capacity: usize,
}

pub fn load_demoreel_config<P: AsRef<Path>>(path: P) -> Result<DemoreelConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: DemoreelConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })?;
    config.validate(path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/demoreel.toml");
        let config = load_demoreel_config(path).expect("config should parse");
        assert_eq!(config.playback.process_name, "cs2.exe");
        assert_eq!(config.playback.ready_timeout(), Duration::from_secs(60));
        assert!(config.resolver.endpoints.len() >= 2);
        assert_eq!(config.capture.extension, "mp4");
        assert!(config.results.capacity > 0);
    }

    #[test]
    fn rejects_empty_endpoints() {
        let raw = std::fs::read_to_string(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/demoreel.toml"),
        )
        .unwrap();
        let mut config: DemoreelConfig = toml::from_str(&raw).unwrap();
        config.resolver.endpoints.clear();
        let err = config.validate(Path::new("demoreel.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
