//! Saga log identity.
//!
//! A log is addressed by its storage root, the cluster instance that owns it,
//! and a logical name. On disk the identity becomes a single file name:
//!
//! ```text
//! <clusterInstanceId>.--.<logName>.sagalog
//! ```
//!
//! The cluster instance id may not contain the separator, so parsing splits
//! at its first occurrence. The log name may contain anything except a path
//! separator.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Separator between cluster instance id and log name.
pub const LOG_ID_SEPARATOR: &str = ".--.";

/// Suffix of every log file.
pub const LOG_FILE_SUFFIX: &str = ".sagalog";

/// Identity of one saga log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SagaLogId {
    root: PathBuf,
    cluster_instance_id: String,
    log_name: String,
}

impl SagaLogId {
    /// Composes an identity from its parts.
    ///
    /// The root is made absolute and canonicalised. A root that does not
    /// exist yet resolves through its deepest existing ancestor, so the
    /// identity does not change once the directory is created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLogId` if a part is empty, the cluster instance id
    /// contains the separator, or either name contains a path separator.
    pub fn new(
        root: impl AsRef<Path>,
        cluster_instance_id: impl Into<String>,
        log_name: impl Into<String>,
    ) -> CoreResult<Self> {
        let root = root.as_ref();
        let cluster_instance_id = cluster_instance_id.into();
        let log_name = log_name.into();

        if root.as_os_str().is_empty() {
            return Err(CoreError::invalid_log_id("storage root is empty"));
        }
        if cluster_instance_id.is_empty() {
            return Err(CoreError::invalid_log_id("cluster instance id is empty"));
        }
        if log_name.is_empty() {
            return Err(CoreError::invalid_log_id("log name is empty"));
        }
        if cluster_instance_id.contains(LOG_ID_SEPARATOR) {
            return Err(CoreError::invalid_log_id(format!(
                "cluster instance id {cluster_instance_id:?} contains {LOG_ID_SEPARATOR:?}"
            )));
        }
        for (what, value) in [
            ("cluster instance id", &cluster_instance_id),
            ("log name", &log_name),
        ] {
            if value.contains(is_path_separator) {
                return Err(CoreError::invalid_log_id(format!(
                    "{what} {value:?} contains a path separator"
                )));
            }
        }

        Ok(Self {
            root: normalize_root(root)?,
            cluster_instance_id,
            log_name,
        })
    }

    /// Parses an identity from the path of a log file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLogId` if the file name lacks the suffix or the
    /// separator, or does not survive being recomposed from its parts.
    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                CoreError::invalid_log_id(format!("{} has no UTF-8 file name", path.display()))
            })?;

        let stem = file_name.strip_suffix(LOG_FILE_SUFFIX).ok_or_else(|| {
            CoreError::invalid_log_id(format!(
                "file name {file_name:?} does not end with {LOG_FILE_SUFFIX:?}"
            ))
        })?;
        // Searching the stem rejects a separator overlapping the suffix.
        let (cluster_instance_id, log_name) =
            stem.split_once(LOG_ID_SEPARATOR).ok_or_else(|| {
                CoreError::invalid_log_id(format!(
                    "file name {file_name:?} is missing the separator {LOG_ID_SEPARATOR:?}"
                ))
            })?;

        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let id = Self::new(root, cluster_instance_id, log_name)?;

        if id.file_name() != file_name {
            return Err(CoreError::invalid_log_id(format!(
                "file name {file_name:?} cannot be recomposed from its parts"
            )));
        }
        Ok(id)
    }

    /// Returns the storage root holding the log file.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the cluster instance that owns the log.
    #[must_use]
    pub fn cluster_instance_id(&self) -> &str {
        &self.cluster_instance_id
    }

    /// Returns the logical log name.
    #[must_use]
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    /// Returns the file name of the log.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}{LOG_ID_SEPARATOR}{}{LOG_FILE_SUFFIX}",
            self.cluster_instance_id, self.log_name
        )
    }

    /// Returns the absolute path of the log file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.root.join(self.file_name())
    }
}

impl fmt::Display for SagaLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

fn is_path_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Canonicalises the deepest existing ancestor of `root` and re-appends the
/// components below it, so a root reached through a symlink names the same
/// directory before and after it is created.
fn normalize_root(root: &Path) -> io::Result<PathBuf> {
    match root.canonicalize() {
        Ok(canonical) => return Ok(canonical),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let absolute = normalize_lexically(&std::path::absolute(root)?);
    let mut missing = Vec::new();
    let mut ancestor = absolute.as_path();
    loop {
        let (Some(name), Some(parent)) = (ancestor.file_name(), ancestor.parent()) else {
            return Ok(absolute.clone());
        };
        missing.push(name);
        ancestor = parent;

        match ancestor.canonicalize() {
            Ok(mut resolved) => {
                resolved.extend(missing.iter().rev());
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
