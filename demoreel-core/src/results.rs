use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::job::JobResult;

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("failed to access results file {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("results path not configured")]
    MissingStore,
}

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(Debug, Clone)]
pub struct ResultsStoreBuilder {
    path: Option<PathBuf>,
    capacity: usize,
}

impl Default for ResultsStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            capacity: 250,
        }
    }
}

impl ResultsStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> ResultsResult<ResultsStore> {
        let path = self.path.ok_or(ResultsError::MissingStore)?;
        Ok(ResultsStore {
            inner: Arc::new(StoreInner {
                path,
                capacity: self.capacity,
                entries: Mutex::new(VecDeque::new()),
            }),
        })
    }
}

/// Capacity-bounded durable history of job results.
///
/// The sole persisted state of the system: a single JSON file holding the
/// last N results, rewritten wholesale on every append. Reloading it at
/// startup repopulates the UI history; nothing is reconciled against the
/// recorder or the publisher.
#[derive(Clone, Debug)]
pub struct ResultsStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    capacity: usize,
    entries: Mutex<VecDeque<JobResult>>,
}

impl ResultsStore {
    pub fn builder() -> ResultsStoreBuilder {
        ResultsStoreBuilder::new()
    }

    /// Loads previously persisted results. A missing or malformed file is
    /// not fatal: history simply starts empty.
    pub fn initialize(&self) -> ResultsResult<usize> {
        let path = &self.inner.path;
        if !path.exists() {
            info!(path = %path.display(), "no results file found, starting with empty history");
            return Ok(0);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ResultsError::Io {
            source,
            path: path.clone(),
        })?;
        let loaded: Vec<JobResult> = match serde_json::from_str(&content) {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(path = %path.display(), %error, "could not decode results file, starting with empty history");
                return Ok(0);
            }
        };
        let mut entries = self.inner.entries.lock().unwrap();
        entries.clear();
        entries.extend(loaded);
        while entries.len() > self.inner.capacity {
            entries.pop_front();
        }
        Ok(entries.len())
    }

    /// Appends one result, evicting the oldest entry beyond capacity, and
    /// rewrites the results file. The in-memory entry survives even when
    /// the rewrite fails, so the caller can log and carry on.
    pub fn append(&self, result: JobResult) -> ResultsResult<()> {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.push_back(result);
        while entries.len() > self.inner.capacity {
            entries.pop_front();
        }
        self.persist(&entries)
    }

    /// Oldest-to-newest snapshot of the retained history.
    pub fn recent(&self) -> Vec<JobResult> {
        self.inner.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn persist(&self, entries: &VecDeque<JobResult>) -> ResultsResult<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ResultsError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let snapshot: Vec<&JobResult> = entries.iter().collect();
        let payload = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(path, payload).map_err(|source| ResultsError::Io {
            source,
            path: path.clone(),
        })?;
        Ok(())
    }
}
