//! Stress tests for typedidb.
//!
//! These drive many scopes and long request chains through the in-memory
//! engine and count what committed.

use std::time::{Duration, Instant};

use typedidb_core::{CoreError, Database, Key, RequestHandle, TransactionMode};

use crate::fixtures::{Note, SampleRecord, TestEnv, GENERATED_STORE, NESTED_STORE};

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
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of distinct keys written.
    pub key_count: usize,
    /// Scopes open at the same time in interleaved runs.
    pub scopes: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            key_count: 1_000,
            scopes: 16,
        }
    }
}

fn sample(i: usize, config: &StressConfig) -> SampleRecord {
    SampleRecord::new(format!("key-{}", i % config.key_count.max(1)), i as i64)
}

fn tally<T>(results: impl IntoIterator<Item = Result<T, CoreError>>) -> (usize, usize) {
    results
        .into_iter()
        .fold((0, 0), |(ok, failed), result| match result {
            Ok(_) => (ok + 1, failed),
            Err(_) => (ok, failed + 1),
        })
}

/// One scope per write, each awaited before the next.
pub fn stress_sequential_writes(
    env: &TestEnv,
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let (successful, failed) = tally((0..config.operations).map(|i| -> Result<Key, CoreError> {
        let scope = db.transaction(&[NESTED_STORE], TransactionMode::ReadWrite)?;
        let written = scope
            .store::<SampleRecord>(NESTED_STORE)?
            .put(&sample(i, config))?;
        env.run(scope.after_commit(written))
    }));
    StressTestResult::new(successful, failed, start.elapsed())
}

/// A single scope whose writes are all chained from one another.
pub fn stress_chained_writes(
    env: &TestEnv,
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let result = db
        .transaction(&[NESTED_STORE], TransactionMode::ReadWrite)
        .and_then(|scope| {
            let records: Vec<_> = (0..config.operations).map(|i| sample(i, config)).collect();
            let written = scope.store::<SampleRecord>(NESTED_STORE)?.put_all(records)?;
            env.run(scope.after_commit(written))
        });
    match result {
        Ok(keys) => StressTestResult::new(keys.len(), 0, start.elapsed()),
        Err(_) => StressTestResult::new(0, config.operations, start.elapsed()),
    }
}

/// Many read-write scopes over the same store issued up front; the engine
/// runs them one after another.
pub fn stress_interleaved_scopes(
    env: &TestEnv,
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let per_scope = config.operations / config.scopes.max(1);
    let mut pending = Vec::new();
    let mut failed = 0;
    for s in 0..config.scopes {
        let issued = db
            .transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)
            .and_then(|scope| {
                let notes = (0..per_scope).map(move |i| Note::new(format!("scope {s} note {i}")));
                let written = scope.store::<Note>(GENERATED_STORE)?.add_all(notes)?;
                Ok(scope.after_commit(written))
            });
        match issued {
            Ok(result) => pending.push(result),
            Err(_) => failed += per_scope,
        }
    }
    let mut successful = 0;
    for result in pending {
        match env.run(result) {
            Ok(keys) => successful += keys.len(),
            Err(_) => failed += per_scope,
        }
    }
    StressTestResult::new(successful, failed, start.elapsed())
}

/// Populates the store, then reads every key back in one chained scope.
pub fn stress_sequential_reads(
    env: &TestEnv,
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let populate = StressConfig {
        operations: config.key_count,
        ..config.clone()
    };
    stress_chained_writes(env, db, &populate);

    let start = Instant::now();
    let result = db
        .transaction(&[NESTED_STORE], TransactionMode::ReadOnly)
        .and_then(|scope| {
            let store = scope.store::<SampleRecord>(NESTED_STORE)?;
            let mut chain: RequestHandle<usize> = RequestHandle::ready(Ok(0));
            for i in 0..config.operations {
                let store = store.clone();
                let key = sample(i, config).key1.key2;
                chain = chain.and_then(move |found| {
                    Ok(store.get(key)?.map(move |record| found + usize::from(record.is_some())))
                });
            }
            env.run(scope.after_commit(chain))
        });
    match result {
        Ok(found) => StressTestResult::new(found, config.operations - found, start.elapsed()),
        Err(_) => StressTestResult::new(0, config.operations, start.elapsed()),
    }
}

/// Writes in scopes that are aborted every other time; only the committed
/// half should land.
pub fn stress_transaction_aborts(
    env: &TestEnv,
    db: &Database,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let (successful, failed) = tally((0..config.operations).map(|i| -> Result<Key, CoreError> {
        let scope = db.transaction(&[GENERATED_STORE], TransactionMode::ReadWrite)?;
        let written = scope
            .store::<Note>(GENERATED_STORE)?
            .add(&Note::new(format!("abort test {i}")))?;
        if i % 2 == 1 {
            scope.abort()?;
        }
        env.run(scope.after_commit(written))
    }));
    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::unique_db_name;
    use crate::integration::committed_count;

    fn small() -> StressConfig {
        StressConfig {
            operations: 500,
            key_count: 50,
            scopes: 10,
        }
    }

    #[test]
    fn test_sequential_writes() {
        let env = TestEnv::new();
        let name = unique_db_name("stress");
        let db = env.open(&name, Some(1));
        let result = stress_sequential_writes(&env, &db, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
        assert_eq!(committed_count(&env, &name, NESTED_STORE), 50);
    }

    #[test]
    fn test_chained_writes() {
        let env = TestEnv::new();
        let db = env.open(&unique_db_name("stress"), Some(1));
        let config = StressConfig {
            operations: 5_000,
            ..small()
        };
        let result = stress_chained_writes(&env, &db, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 5_000);
    }

    #[test]
    fn test_interleaved_scopes() {
        let env = TestEnv::new();
        let name = unique_db_name("stress");
        let db = env.open(&name, Some(1));
        let result = stress_interleaved_scopes(&env, &db, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
        assert_eq!(committed_count(&env, &name, GENERATED_STORE), 500);
    }

    #[test]
    fn test_sequential_reads() {
        let env = TestEnv::new();
        let db = env.open(&unique_db_name("stress"), Some(1));
        let result = stress_sequential_reads(&env, &db, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 500);
    }

    #[test]
    fn test_transaction_aborts() {
        let env = TestEnv::new();
        let name = unique_db_name("stress");
        let db = env.open(&name, Some(1));
        let result = stress_transaction_aborts(&env, &db, &small());
        assert_eq!(result.successful_ops, 250);
        assert_eq!(result.failed_ops, 250);
        assert_eq!(committed_count(&env, &name, GENERATED_STORE), 250);
    }
}
