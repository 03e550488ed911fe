//! Crash recovery testing for SagaLog.
//!
//! Simulates crashes at various points of log operations and verifies that
//! reopening the log recovers exactly the entries that were durably written.
//!
//! ## Test Strategy
//!
//! 1. **Crash during append** - the torn entry is discarded on reopen
//! 2. **Crash during truncate** - the header rewrite never lands, so every
//!    entry is still present
//! 3. **Crash during truncate_all** - the file is cut but the header is not
//!    reset, which reopens as an empty log
//! 4. **Crash after writes** - ids continue past the surviving maximum
//! 5. **Failed sync** - an entry whose sync fails is neither visible nor
//!    recovered, and its id is not handed out twice
//!
//! ## Usage
//!
//! ```rust
//! use sagalog_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::scenarios::write_vanilla_saga;
use sagalog_core::{CoreResult, EntryId, SagaLog, SagaLogId};
use sagalog_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected entries after recovery.
    pub expected_entries: usize,
    /// Actual entries after recovery.
    pub actual_entries: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, entries: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_entries: entries,
            actual_entries: entries,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_entries: expected,
            actual_entries: actual,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug)]
struct CrashState {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    fail_header_writes: AtomicBool,
    fail_syncs: AtomicBool,
    crashed: AtomicBool,
}

/// Controls a [`CrashableBackend`] after it has been handed to a log.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<CrashState>,
}

impl CrashSwitch {
    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether in-place header writes fail.
    pub fn set_fail_header_writes(&self, fail: bool) {
        self.state.fail_header_writes.store(fail, Ordering::SeqCst);
    }

    /// Sets whether syncs fail. A failing sync is an I/O error, not a crash.
    pub fn set_fail_syncs(&self, fail: bool) {
        self.state.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// A crash during an append writes the bytes up to the crash point and then
/// fails, leaving a torn record behind as a power cut would. The backend
/// keeps refusing writes afterwards.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<CrashState>,
}

impl CrashableBackend {
    /// Wraps a backend, returning the switch that triggers crashes.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashSwitch) {
        let state = Arc::new(CrashState {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            fail_header_writes: AtomicBool::new(false),
            fail_syncs: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        });
        let switch = CrashSwitch {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, switch)
    }

    fn crash(&self, what: &str) -> StorageError {
        if !self.state.crashed.swap(true, Ordering::SeqCst) {
            tracing::debug!(what, "simulating crash");
        }
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("append after crash"));
        }
        let current = self
            .state
            .bytes_written
            .fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.state.crash_after_bytes.load(Ordering::SeqCst);

        if current + data.len() > threshold {
            let partial_len = threshold.saturating_sub(current);
            if partial_len > 0 {
                let _ = self.inner.append(&data[..partial_len]);
            }
            return Err(self.crash("append"));
        }

        self.inner.append(data)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if self.state.crashed.load(Ordering::SeqCst)
            || self.state.fail_header_writes.load(Ordering::SeqCst)
        {
            return Err(self.crash("header write"));
        }
        self.inner.write_at(offset, data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_syncs.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated sync failure",
            )));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        // A crashed process cannot clean up after itself.
        if self.state.crashed.load(Ordering::SeqCst) {
            return Err(self.crash("truncate after crash"));
        }
        self.inner.truncate(new_size)
    }
}

/// Test harness for crash recovery scenarios.
///
/// Every scenario runs against a shared in-memory buffer: the crashing log
/// writes through a [`CrashableBackend`], and recovery reopens the same
/// buffer with a clean backend.
#[derive(Debug, Default)]
pub struct CrashRecoveryHarness {
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a new harness.
    pub fn new() -> Self {
        Self::default()
    }

    fn log_id() -> SagaLogId {
        SagaLogId::new("/crash-test", "01", "crash").expect("Invalid log id")
    }

    fn crashable_log(storage: &InMemoryBackend) -> CoreResult<(SagaLog, CrashSwitch)> {
        let (backend, switch) = CrashableBackend::new(Box::new(storage.share()));
        let log = SagaLog::open(Self::log_id(), Box::new(backend))?;
        Ok((log, switch))
    }

    fn recover(storage: &InMemoryBackend) -> CoreResult<SagaLog> {
        SagaLog::open(Self::log_id(), Box::new(storage.share()))
    }

    fn check(
        &mut self,
        description: &str,
        expected: usize,
        run: impl FnOnce() -> CoreResult<usize>,
    ) -> CrashRecoveryResult {
        let result = match run() {
            Ok(actual) if actual == expected => CrashRecoveryResult::pass(description, actual),
            Ok(actual) => CrashRecoveryResult::fail(
                description,
                expected,
                actual,
                "recovered entry count mismatch",
            ),
            Err(e) => CrashRecoveryResult::fail(description, expected, 0, &e.to_string()),
        };
        self.results.push(result.clone());
        result
    }

    /// Entries written before a torn append survive; the torn one does not.
    pub fn test_torn_append_discarded(&mut self) -> CrashRecoveryResult {
        self.check("Torn append discarded", 6, || {
            let storage = InMemoryBackend::new();
            let (log, switch) = Self::crashable_log(&storage)?;
            write_vanilla_saga(&log, "ex-1");

            switch.crash_after(10);
            let _ = log.write(log.builder().start_saga("ex-2", "Torn-Saga", "{}"));
            drop(log);

            let recovered = Self::recover(&storage)?;
            let entries = recovered.read_incomplete_sagas()?;
            Ok(entries.len())
        })
    }

    /// A truncate whose header write never lands leaves every entry.
    pub fn test_interrupted_truncate(&mut self) -> CrashRecoveryResult {
        self.check("Interrupted truncate keeps entries", 6, || {
            let storage = InMemoryBackend::new();
            let (log, switch) = Self::crashable_log(&storage)?;
            let entries = write_vanilla_saga(&log, "ex-1");

            switch.set_fail_header_writes(true);
            let _ = log.truncate(entries[2].id());
            drop(log);

            let recovered = Self::recover(&storage)?;
            Ok(recovered.len()?)
        })
    }

    /// A clear that cut the file but never reset the header reopens empty.
    pub fn test_interrupted_truncate_all(&mut self) -> CrashRecoveryResult {
        self.check("Interrupted truncate_all reopens empty", 0, || {
            let storage = InMemoryBackend::new();
            let (log, switch) = Self::crashable_log(&storage)?;
            let entries = write_vanilla_saga(&log, "ex-1");
            // Move the head off the header so the cut leaves it past the end.
            log.truncate(entries[0].id())?;

            switch.set_fail_header_writes(true);
            let _ = log.truncate_all();
            drop(log);

            let recovered = Self::recover(&storage)?;
            let count = recovered.len()?;
            let entry = recovered.write(recovered.builder().end_saga("ex-2"))?;
            if recovered.read_incomplete_sagas()? != vec![entry] {
                return Ok(usize::MAX);
            }
            Ok(count)
        })
    }

    /// Ids generated after recovery continue past the surviving maximum.
    pub fn test_ids_continue_after_crash(&mut self) -> CrashRecoveryResult {
        self.check("Ids continue after crash", 7, || {
            let storage = InMemoryBackend::new();
            let (log, switch) = Self::crashable_log(&storage)?;
            write_vanilla_saga(&log, "ex-1");
            switch.crash_after(3);
            let _ = log.write(log.builder().end_saga("ex-1"));
            drop(log);

            let recovered = Self::recover(&storage)?;
            let entry = recovered.write(recovered.builder().end_saga("ex-2"))?;
            if entry.id() != EntryId::new(6) {
                return Ok(usize::MAX);
            }
            Ok(recovered.len()?)
        })
    }

    /// An entry whose sync fails is rolled back; the next entry is the one
    /// both the session and recovery see.
    pub fn test_failed_sync_not_visible(&mut self) -> CrashRecoveryResult {
        self.check("Failed sync leaves no entry", 7, || {
            let storage = InMemoryBackend::new();
            let (log, switch) = Self::crashable_log(&storage)?;
            let mut expected = write_vanilla_saga(&log, "ex-1");

            switch.set_fail_syncs(true);
            if log.write(log.builder().start_saga("ex-A", "Lost-Saga", "{}")).is_ok() {
                return Ok(usize::MAX);
            }
            switch.set_fail_syncs(false);
            expected.push(log.write(log.builder().start_saga("ex-B", "Kept-Saga", "{}"))?);

            if log.read_incomplete_sagas()? != expected {
                return Ok(usize::MAX);
            }
            log.close()?;

            let recovered = Self::recover(&storage)?;
            let entries = recovered.read_incomplete_sagas()?;
            let mut ids: Vec<_> = entries.iter().map(|e| e.id()).collect();
            ids.dedup();
            if entries != expected || ids.len() != entries.len() {
                return Ok(usize::MAX);
            }
            Ok(entries.len())
        })
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_torn_append_discarded(),
            self.test_interrupted_truncate(),
            self.test_interrupted_truncate_all(),
            self.test_ids_continue_after_crash(),
            self.test_failed_sync_not_visible(),
        ]
    }

    /// Returns a summary of all test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "Crash Recovery Tests: {}/{} passed\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            summary.push_str(&format!("  [{}] {}", status, result.description));
            if let Some(error) = &result.error {
                summary.push_str(&format!(" - {error}"));
            }
            summary.push('\n');
        }
        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torn_append_discarded() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_torn_append_discarded();
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn interrupted_truncate() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_interrupted_truncate();
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn interrupted_truncate_all() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_interrupted_truncate_all();
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn ids_continue_after_crash() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_ids_continue_after_crash();
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn failed_sync_not_visible() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_failed_sync_not_visible();
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn run_all() {
        let mut harness = CrashRecoveryHarness::new();
        let results = harness.run_all_tests();
        assert_eq!(results.len(), 5);
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn crash_switch_tracks_state() {
        let (mut backend, switch) = CrashableBackend::new(Box::new(InMemoryBackend::new()));
        backend.append(b"12345").unwrap();
        switch.crash_after(2);
        assert!(backend.append(b"abcd").is_err());
        assert!(switch.has_crashed());
        assert_eq!(backend.size().unwrap(), 7);
        assert!(backend.append(b"x").is_err());
    }
}
