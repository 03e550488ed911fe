//! Stress tests for SagaLog.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::scenarios::vanilla_saga;
use sagalog_core::{SagaLog, SagaLogOwner, SagaLogPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of saga executions to write.
    pub executions: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct logs (for pool tests).
    pub logs: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            executions: 1_000,
            threads: 4,
            logs: 8,
        }
    }
}

/// Writes vanilla sagas from several threads into one log.
///
/// Each operation is one entry write.
pub fn stress_concurrent_writes(log: Arc<SagaLog>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let executions_per_thread = config.executions / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let log = Arc::clone(&log);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..executions_per_thread {
                    for builder in vanilla_saga(&format!("ex-{t}-{i}")) {
                        match log.write(builder) {
                            Ok(_) => {
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Writes and truncates sagas one at a time, as an orchestrator does.
///
/// Each operation is one saga execution: its entries written, read back,
/// then truncated away.
pub fn stress_write_truncate_cycles(log: &SagaLog, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.executions {
        let execution_id = format!("ex-{i}");
        let cycle = || -> sagalog_core::CoreResult<bool> {
            let mut last = None;
            for builder in vanilla_saga(&execution_id) {
                last = Some(log.write(builder)?.id());
            }
            let read = log.read_entries(&execution_id)?.len();
            if let Some(id) = last {
                log.truncate(id)?;
            }
            Ok(read == 6 && log.is_empty()?)
        };
        match cycle() {
            Ok(true) => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Has every thread race to acquire every log.
///
/// Each operation is one acquire attempt; an ownership conflict counts as a
/// successful operation, any other error as a failure. Returns the result
/// together with the number of acquisitions that won.
pub fn stress_acquire_contention(
    pool: Arc<SagaLogPool>,
    config: &StressConfig,
) -> (StressTestResult, usize) {
    let ids: Vec<_> = (0..config.logs)
        .map(|i| {
            pool.register_instance_local_id_for(&format!("contended-{i}"))
                .expect("Invalid log name")
        })
        .collect();
    let ids = Arc::new(ids);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let won = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let ids = Arc::clone(&ids);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let won = Arc::clone(&won);

            thread::spawn(move || {
                let owner = SagaLogOwner::new(format!("owner-{t}"));
                for id in ids.iter() {
                    match pool.acquire(&owner, id) {
                        Ok(_) => {
                            won.fetch_add(1, Ordering::Relaxed);
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if e.is_ownership_conflict() => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );
    (result, won.load(Ordering::Relaxed))
}
