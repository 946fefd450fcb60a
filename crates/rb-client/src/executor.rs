//! Bounded-concurrency execution of independent operations.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Called with `(completed, total)` after every operation finishes.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Runs operations with at most `limit` of them in flight.
///
/// Every operation runs to completion regardless of the others' outcome.
#[derive(Clone)]
pub struct BoundedExecutor {
    limit: usize,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("limit", &self.limit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BoundedExecutor {
    /// A `limit` of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run all `operations`, returning their outcomes in submission order.
    pub async fn run<I, Fut, T>(&self, operations: I) -> Vec<Result<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operations: Vec<Fut> = operations.into_iter().collect();
        let total = operations.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut tasks = JoinSet::new();
        let mut indices: HashMap<task::Id, usize> = HashMap::with_capacity(total);

        debug!(total, limit = self.limit, "Starting bounded batch");

        for (index, operation) in operations.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let handle = tasks.spawn(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => operation.await,
                    Err(_) => Err(ClientError::Join("concurrency limiter closed".into())),
                }
            });
            indices.insert(handle.id(), index);
        }

        let mut results: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_err) => {
                    if join_err.is_panic() {
                        warn!(error = ?join_err, "Operation panicked");
                    } else {
                        warn!(error = ?join_err, "Operation cancelled");
                    }
                    (join_err.id(), Err(ClientError::Join(join_err.to_string())))
                }
            };
            if let Some(&index) = indices.get(&id) {
                results[index] = Some(result);
            }
            completed += 1;
            if let Some(progress) = &self.progress {
                progress(completed, total);
            }
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(ClientError::Join("operation lost".into()))))
            .collect()
    }

    /// Run `operation` over every input and return the inputs whose
    /// operation failed, paired with the error, in submission order.
    pub async fn collect_failures<I, F, Fut, T>(
        &self,
        inputs: Vec<I>,
        operation: F,
    ) -> Vec<(I, ClientError)>
    where
        F: Fn(&I) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let operations: Vec<Fut> = inputs.iter().map(operation).collect();
        let results = self.run(operations).await;
        let failures: Vec<(I, ClientError)> = inputs
            .into_iter()
            .zip(results)
            .filter_map(|(input, result)| result.err().map(|e| (input, e)))
            .collect();
        debug!(failed = failures.len(), "Bounded batch finished");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the number of operations running at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn gauged(gauge: Arc<Gauge>, value: usize, fail: bool) -> Result<usize> {
        gauge.enter();
        tokio::time::sleep(Duration::from_millis(2)).await;
        gauge.exit();
        if fail {
            Err(ClientError::rejected(format!("op {value}")))
        } else {
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let executor = BoundedExecutor::new(3);
        let gauge = Arc::new(Gauge::default());
        let ops = (0..10).map(|i| gauged(gauge.clone(), i, i % 4 == 1));
        let results = executor.run(ops).await;

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            match result {
                Ok(value) => assert_eq!(*value, i),
                Err(e) => {
                    assert_eq!(i % 4, 1);
                    assert_eq!(e.to_string(), format!("rejected: op {i}"));
                }
            }
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    async fn ok(value: u8) -> Result<u8> {
        Ok(value)
    }

    async fn explode() -> Result<u8> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_is_captured() {
        type Op = std::pin::Pin<Box<dyn Future<Output = Result<u8>> + Send>>;
        let executor = BoundedExecutor::new(2);
        let ops: Vec<Op> = vec![Box::pin(ok(1)), Box::pin(explode()), Box::pin(ok(3))];
        let results = executor.run(ops).await;
        assert!(matches!(results[0], Ok(1)));
        assert!(matches!(results[1], Err(ClientError::Join(_))));
        assert!(matches!(results[2], Ok(3)));
    }

    async fn explode_with(message: &'static str) -> Result<u8> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        panic!("{message}")
    }

    #[tokio::test]
    async fn test_panics_are_attributed_to_their_operation() {
        type Op = std::pin::Pin<Box<dyn Future<Output = Result<u8>> + Send>>;
        let done = Arc::new(AtomicUsize::new(0));
        let seen = done.clone();
        let executor = BoundedExecutor::new(4).with_progress(move |completed, _| {
            seen.fetch_max(completed, Ordering::SeqCst);
        });
        let ops: Vec<Op> = vec![
            Box::pin(explode_with("first")),
            Box::pin(ok(1)),
            Box::pin(explode()),
            Box::pin(explode_with("third")),
        ];
        let results = executor.run(ops).await;

        let message = |result: &Result<u8>| match result {
            Err(ClientError::Join(message)) => message.clone(),
            other => panic!("expected a join failure, got {other:?}"),
        };
        assert!(message(&results[0]).contains("first"));
        assert!(matches!(results[1], Ok(1)));
        assert!(message(&results[2]).contains("boom"));
        assert!(message(&results[3]).contains("third"));
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let seen = Arc::new(AtomicUsize::new(0));
        let last = seen.clone();
        let executor = BoundedExecutor::new(4).with_progress(move |done, total| {
            assert!(done <= total);
            last.fetch_max(done, Ordering::SeqCst);
        });
        let gauge = Arc::new(Gauge::default());
        executor
            .run((0..9).map(|i| gauged(gauge.clone(), i, i == 0)))
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_zero_limit_runs_serially() {
        let executor = BoundedExecutor::new(0);
        assert_eq!(executor.limit(), 1);
        let gauge = Arc::new(Gauge::default());
        let results = executor
            .run((0..4).map(|i| gauged(gauge.clone(), i, false)))
            .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_limit_and_failure_count(
            limit in 1usize..8,
            failures in prop::collection::vec(any::<bool>(), 0..40),
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_time()
                .build()
                .unwrap();
            let gauge = Arc::new(Gauge::default());
            let inputs: Vec<(usize, bool)> = failures.iter().copied().enumerate().collect();
            let failed = runtime.block_on(BoundedExecutor::new(limit).collect_failures(
                inputs,
                |&(i, fail)| gauged(gauge.clone(), i, fail),
            ));

            prop_assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
            prop_assert_eq!(failed.len(), failures.iter().filter(|f| **f).count());
            let indices: Vec<usize> = failed.iter().map(|((i, _), _)| *i).collect();
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            prop_assert_eq!(indices, sorted);
        }
    }
}
