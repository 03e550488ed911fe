//! Storage-specific halves of the log pool.

use crate::error::CoreResult;
use crate::log::SagaLog;
use crate::log_id::{SagaLogId, LOG_FILE_SUFFIX};
use parking_lot::Mutex;
use sagalog_storage::{FileBackend, InMemoryBackend};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a [`SagaLogPool`](super::SagaLogPool) finds, opens, and deletes logs.
pub trait LogBackend: Send + Sync {
    /// Composes the identity of a log without touching storage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLogId` if the parts are not a valid identity.
    fn id_for(&self, cluster_instance_id: &str, log_name: &str) -> CoreResult<SagaLogId>;

    /// Lists every log present in storage, across all cluster instances.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be listed.
    fn list(&self) -> CoreResult<Vec<SagaLogId>>;

    /// Opens a new handle on a log, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or its content is corrupt.
    fn open(&self, id: &SagaLogId) -> CoreResult<SagaLog>;

    /// Deletes the storage of a log. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if existing storage cannot be deleted.
    fn delete(&self, id: &SagaLogId) -> CoreResult<bool>;
}

/// Logs stored as `.sagalog` files in one folder.
#[derive(Debug, Clone)]
pub struct FileLogBackend {
    folder: PathBuf,
    sync_on_write: bool,
}

impl FileLogBackend {
    /// Creates a backend over `folder`. The folder is created on first open.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            sync_on_write: true,
        }
    }

    /// Sets whether log writes are synced before returning.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Returns the folder holding the log files.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

impl LogBackend for FileLogBackend {
    fn id_for(&self, cluster_instance_id: &str, log_name: &str) -> CoreResult<SagaLogId> {
        SagaLogId::new(&self.folder, cluster_instance_id, log_name)
    }

    fn list(&self) -> CoreResult<Vec<SagaLogId>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_log_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(LOG_FILE_SUFFIX));
            if !is_log_file || !path.is_file() {
                continue;
            }
            match SagaLogId::from_path(&path) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed log file"),
            }
        }
        Ok(ids)
    }

    fn open(&self, id: &SagaLogId) -> CoreResult<SagaLog> {
        let backend = FileBackend::open_with_create_dirs(&id.path())?;
        SagaLog::open_with_options(id.clone(), Box::new(backend), self.sync_on_write)
    }

    fn delete(&self, id: &SagaLogId) -> CoreResult<bool> {
        match fs::remove_file(id.path()) {
            Ok(()) => {
                debug!(log = %id, "saga log file deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Logs held in shared memory buffers, for tests.
///
/// Reopening a log sees everything written through earlier handles, as a
/// file would.
#[derive(Debug)]
pub struct InMemoryLogBackend {
    root: PathBuf,
    logs: Mutex<HashMap<SagaLogId, InMemoryBackend>>,
}

impl InMemoryLogBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/sagalog-memory")
    }

    /// Creates an empty backend whose identities use `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            logs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLogBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBackend for InMemoryLogBackend {
    fn id_for(&self, cluster_instance_id: &str, log_name: &str) -> CoreResult<SagaLogId> {
        SagaLogId::new(&self.root, cluster_instance_id, log_name)
    }

    fn list(&self) -> CoreResult<Vec<SagaLogId>> {
        Ok(self.logs.lock().keys().cloned().collect())
    }

    fn open(&self, id: &SagaLogId) -> CoreResult<SagaLog> {
        let backend = self.logs.lock().entry(id.clone()).or_default().share();
        SagaLog::open(id.clone(), Box::new(backend))
    }

    fn delete(&self, id: &SagaLogId) -> CoreResult<bool> {
        Ok(self.logs.lock().remove(id).is_some())
    }
}
