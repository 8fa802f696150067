use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("no .{extension} files found in {directory}")]
    NotFound {
        directory: PathBuf,
        extension: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// Picks the most recently written file with the given extension.
///
/// The recorder does not tag its output per job, so "latest file" is the
/// only discovery mechanism available. The orchestrator processes one job
/// end-to-end at a time precisely so this cannot race another capture.
pub fn locate_latest(directory: &Path, extension: &str) -> ArtifactResult<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let entries = std::fs::read_dir(directory).map_err(io_error(directory))?;
    for entry in entries {
        let entry = entry.map_err(io_error(directory))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        let metadata = entry.metadata().map_err(io_error(&path))?;
        let written = metadata.modified().map_err(io_error(&path))?;
        match &newest {
            Some((current, _)) if *current >= written => {}
            _ => newest = Some((written, path)),
        }
    }
    newest
        .map(|(_, path)| path)
        .ok_or_else(|| ArtifactError::NotFound {
            directory: directory.to_path_buf(),
            extension: extension.to_string(),
        })
}

/// First free destination for `stem.extension` inside `directory`,
/// suffixing `-002`, `-003`, ... on collision. Never points at an
/// existing file.
pub fn unique_destination(directory: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = directory.join(format!("{stem}.{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 2u32;
    loop {
        let candidate = directory.join(format!("{stem}-{counter:03}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Renames an artifact to a human-readable name derived from the subject
/// id, the best-effort display name, and a timestamp. Collision-safe,
/// never destructive.
pub fn rename_with_metadata(
    path: &Path,
    subject_id: &str,
    label: Option<&str>,
    timestamp: DateTime<Utc>,
) -> ArtifactResult<PathBuf> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    let mut stem = String::new();
    if let Some(label) = label.map(sanitize_label).filter(|label| !label.is_empty()) {
        stem.push_str(&label);
        stem.push('_');
    }
    stem.push_str(subject_id);
    stem.push('_');
    stem.push_str(&timestamp.format("%Y-%m-%d_%H-%M-%S").to_string());

    let destination = unique_destination(directory, &stem, &extension);
    std::fs::rename(path, &destination).map_err(io_error(path))?;
    info!(
        from = %path.display(),
        to = %destination.display(),
        "artifact renamed"
    );
    Ok(destination)
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
