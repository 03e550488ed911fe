//! Pool configuration.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration key naming the folder that holds the log files.
pub const FOLDER_KEY: &str = "filesagalog.folder";

/// Configuration key naming this process's cluster instance.
pub const CLUSTER_INSTANCE_ID_KEY: &str = "cluster.instance-id";

const DEFAULT_FOLDER: &str = "target/test-sagalog";
const DEFAULT_CLUSTER_INSTANCE_ID: &str = "01";

/// Configuration for a file-backed log pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Folder holding the `.sagalog` files.
    pub folder: PathBuf,

    /// Cluster instance this process runs as.
    pub cluster_instance_id: String,

    /// Whether to sync every queue mutation before returning (safer but slower).
    pub sync_on_write: bool,
}

impl Config {
    /// Creates a configuration for the given folder and cluster instance.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>, cluster_instance_id: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            cluster_instance_id: cluster_instance_id.into(),
            sync_on_write: true,
        }
    }

    /// Returns the default key/value settings.
    #[must_use]
    pub fn defaults() -> HashMap<String, String> {
        HashMap::from([
            (FOLDER_KEY.to_string(), DEFAULT_FOLDER.to_string()),
            (
                CLUSTER_INSTANCE_ID_KEY.to_string(),
                DEFAULT_CLUSTER_INSTANCE_ID.to_string(),
            ),
        ])
    }

    /// Builds a configuration from key/value settings.
    ///
    /// Both [`FOLDER_KEY`] and [`CLUSTER_INSTANCE_ID_KEY`] are mandatory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a key is missing or blank.
    pub fn from_map(settings: &HashMap<String, String>) -> CoreResult<Self> {
        let folder = required(settings, FOLDER_KEY)?;
        let cluster_instance_id = required(settings, CLUSTER_INSTANCE_ID_KEY)?;
        Ok(Self::new(folder, cluster_instance_id))
    }

    /// Sets the log folder.
    #[must_use]
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = folder.into();
        self
    }

    /// Sets the cluster instance id.
    #[must_use]
    pub fn cluster_instance_id(mut self, id: impl Into<String>) -> Self {
        self.cluster_instance_id = id.into();
        self
    }

    /// Sets whether queue mutations are synced before returning.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.folder.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(CoreError::invalid_config(format!("{FOLDER_KEY} is blank")));
        }
        if self.cluster_instance_id.trim().is_empty() {
            return Err(CoreError::invalid_config(format!(
                "{CLUSTER_INSTANCE_ID_KEY} is blank"
            )));
        }
        Ok(())
    }

    /// Returns the log folder.
    #[must_use]
    pub fn folder_path(&self) -> &Path {
        &self.folder
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDER, DEFAULT_CLUSTER_INSTANCE_ID)
    }
}

fn required<'a>(settings: &'a HashMap<String, String>, key: &str) -> CoreResult<&'a str> {
    match settings.get(key).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(CoreError::invalid_config(format!("{key} is blank"))),
        None => Err(CoreError::invalid_config(format!("{key} is missing"))),
    }
}
