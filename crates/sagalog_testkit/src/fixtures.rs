//! Test fixtures for pools and logs.
//!
//! Provides pools over temporary folders or in-memory storage, and the
//! canonical saga scenarios the tests replay.

use sagalog_core::{Config, SagaLog, SagaLogId, SagaLogPool};
use sagalog_storage::FileBackend;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Cluster instance id used by test pools.
pub const TEST_CLUSTER_INSTANCE_ID: &str = "test01";

/// A test pool with automatic cleanup.
///
/// Shuts the pool down when dropped.
pub struct TestPool {
    /// The pool instance.
    pub pool: SagaLogPool,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestPool {
    /// Creates a pool over in-memory storage.
    pub fn memory() -> Self {
        Self {
            pool: SagaLogPool::in_memory(TEST_CLUSTER_INSTANCE_ID),
            temp_dir: None,
        }
    }

    /// Creates a file-backed pool in a fresh temporary folder.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config::new(temp_dir.path(), TEST_CLUSTER_INSTANCE_ID);
        let pool = SagaLogPool::initialize(&config).expect("Failed to initialize pool");
        Self {
            pool,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the log folder if file-backed, None if in-memory.
    pub fn folder(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Connects an instance-local log by name.
    pub fn log(&self, log_name: &str) -> Arc<SagaLog> {
        let id = self
            .pool
            .register_instance_local_id_for(log_name)
            .expect("Invalid log name");
        self.pool.connect(&id).expect("Failed to connect log")
    }
}

impl std::ops::Deref for TestPool {
    type Target = SagaLogPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        let _ = self.pool.shutdown();
    }
}

/// A standalone file-backed log in a temporary folder.
pub struct TestLog {
    /// The log instance.
    pub log: SagaLog,
    temp_dir: TempDir,
}

impl TestLog {
    /// Opens a fresh log.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let log = open_log(temp_dir.path());
        Self { log, temp_dir }
    }

    /// Closes the log and opens it again from disk.
    pub fn reopen(self) -> Self {
        let Self { log, temp_dir } = self;
        log.close().expect("Failed to close log");
        drop(log);
        let log = open_log(temp_dir.path());
        Self { log, temp_dir }
    }

    /// Returns the folder holding the log file.
    pub fn folder(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestLog {
    type Target = SagaLog;

    fn deref(&self) -> &Self::Target {
        &self.log
    }
}

fn open_log(folder: &Path) -> SagaLog {
    let id = SagaLogId::new(folder, TEST_CLUSTER_INSTANCE_ID, "test-sagalog").expect("Invalid log id");
    let backend = FileBackend::open(&id.path()).expect("Failed to open log file");
    SagaLog::open(id, Box::new(backend)).expect("Failed to open log")
}

/// Runs a test with a temporary in-memory pool.
///
/// # Example
///
/// ```rust
/// use sagalog_testkit::with_temp_pool;
///
/// with_temp_pool(|pool| {
///     let id = pool.register_instance_local_id_for("l1").unwrap();
///     assert!(pool.connect(&id).is_ok());
/// });
/// ```
pub fn with_temp_pool<F, R>(f: F) -> R
where
    F: FnOnce(&SagaLogPool) -> R,
{
    let test_pool = TestPool::memory();
    f(&test_pool.pool)
}

/// Runs a test with a temporary file-backed pool.
pub fn with_file_pool<F, R>(f: F) -> R
where
    F: FnOnce(&SagaLogPool, &Path) -> R,
{
    let test_pool = TestPool::file();
    let folder = test_pool
        .folder()
        .expect("File pool should have a folder")
        .to_path_buf();
    f(&test_pool.pool, &folder)
}

/// Returns a fresh random execution id.
pub fn new_execution_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Canonical saga scenarios.
pub mod scenarios {
    use sagalog_core::{SagaLog, SagaLogEntry, SagaLogEntryBuilder};

    /// Name of the saga written by [`write_vanilla_saga`].
    pub const VANILLA_SAGA_NAME: &str = "Vanilla-Saga";

    /// Builders for a successful two-action saga execution.
    ///
    /// Both actions start before either ends, then the saga ends.
    pub fn vanilla_saga(execution_id: &str) -> Vec<SagaLogEntryBuilder> {
        let b = SagaLogEntryBuilder::new;
        vec![
            b().start_saga(execution_id, VANILLA_SAGA_NAME, "{}"),
            b().start_action(execution_id, "action1"),
            b().start_action(execution_id, "action2"),
            b().end_action(execution_id, "action1", "{}"),
            b().end_action(execution_id, "action2", "{}"),
            b().end_saga(execution_id),
        ]
    }

    /// Builders for a saga whose second action fails and is compensated.
    pub fn aborted_saga(execution_id: &str) -> Vec<SagaLogEntryBuilder> {
        let b = SagaLogEntryBuilder::new;
        vec![
            b().start_saga(execution_id, "Compensated-Saga", r#"{"order":42}"#),
            b().start_action(execution_id, "reserve"),
            b().end_action(execution_id, "reserve", r#"{"reserved":true}"#),
            b().start_action(execution_id, "charge"),
            b().abort(execution_id, "charge"),
            b().comp_done(execution_id, "reserve"),
            b().end_saga(execution_id),
        ]
    }

    /// Writes every builder and returns the stored entries in order.
    pub fn write_all(log: &SagaLog, builders: Vec<SagaLogEntryBuilder>) -> Vec<SagaLogEntry> {
        builders
            .into_iter()
            .map(|builder| log.write(builder).expect("Failed to write entry"))
            .collect()
    }

    /// Writes a successful vanilla saga execution.
    pub fn write_vanilla_saga(log: &SagaLog, execution_id: &str) -> Vec<SagaLogEntry> {
        write_all(log, vanilla_saga(execution_id))
    }
}
