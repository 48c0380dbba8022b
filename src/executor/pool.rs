//! Bounded fan-out of independent tasks.
//!
//! Each task is a future keyed by a caller-chosen name. Small batches run
//! one after another; larger ones run on tokio tasks with a semaphore
//! capping how many are in flight. A failing task never cancels its peers;
//! only Ctrl-C at the coordinator does.

use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::ParallelConfig;
use crate::error::{Error, Result};

/// Outcome of a pool run, in submission order.
#[derive(Debug)]
pub struct PoolReport<T> {
    /// Values of the tasks that succeeded
    pub results: IndexMap<String, T>,
    pub success_count: usize,
    /// Errors of the tasks that failed
    pub failures: IndexMap<String, Error>,
}

impl<T> PoolReport<T> {
    pub fn total(&self) -> usize {
        self.success_count + self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Log one line per failure and turn any failure into an error.
    pub fn into_result(self, what: &str) -> Result<IndexMap<String, T>> {
        if self.failures.is_empty() {
            return Ok(self.results);
        }
        for (name, err) in &self.failures {
            error!("{}: {}", name, err);
        }
        Err(Error::other(format!(
            "Failed to {} {} of {}: {}",
            what,
            self.failures.len(),
            self.total(),
            self.failures.keys().cloned().collect::<Vec<_>>().join(", ")
        )))
    }
}

/// Runs batches of tasks with bounded parallelism.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    /// Batches smaller than this run serially
    thresh: usize,
    max: usize,
}

impl TaskPool {
    pub fn new(thresh: usize, max: usize) -> Self {
        Self { thresh, max: max.max(1) }
    }

    /// Pool for per-host work (SSH, node calls).
    pub fn for_hosts(config: &ParallelConfig) -> Self {
        Self::new(config.thresh, config.max)
    }

    /// Pool for plain API calls, which are cheap to run many at once.
    pub fn for_calls(config: &ParallelConfig) -> Self {
        Self::new(config.calls_min, config.calls_max)
    }

    /// Run every task to completion and collect the outcomes.
    ///
    /// Returns [`Error::Aborted`] if Ctrl-C arrives first; still-running
    /// tasks are aborted.
    pub async fn run<T, Fut>(&self, tasks: Vec<(String, Fut)>) -> Result<PoolReport<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = tasks.len();
        let mut names = Vec::with_capacity(total);
        let mut outcomes: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();

        if total < self.thresh || self.max == 1 {
            debug!("Running {} tasks serially", total);
            for (index, (name, task)) in tasks.into_iter().enumerate() {
                names.push(name);
                let outcome = tokio::select! {
                    outcome = guarded(task) => outcome,
                    _ = tokio::signal::ctrl_c() => return Err(Error::Aborted),
                };
                outcomes[index] = Some(outcome);
            }
        } else {
            let limit = self.max.min(total);
            debug!("Running {} tasks, {} at a time", total, limit);
            let semaphore = Arc::new(Semaphore::new(limit));
            let mut join_set = JoinSet::new();

            for (index, (name, task)) in tasks.into_iter().enumerate() {
                names.push(name);
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => guarded(task).await,
                        Err(_) => Err(Error::other("Task pool closed")),
                    };
                    (index, outcome)
                });
            }

            loop {
                tokio::select! {
                    next = join_set.join_next() => match next {
                        Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                        // Panics are caught in the task, so this is cancellation
                        Some(Err(e)) => error!("Worker task ended abnormally: {}", e),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        join_set.abort_all();
                        return Err(Error::Aborted);
                    }
                }
            }
        }

        let mut report = PoolReport {
            results: IndexMap::new(),
            success_count: 0,
            failures: IndexMap::new(),
        };
        for (name, outcome) in unique_names(names).into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(value)) => {
                    report.success_count += 1;
                    report.results.insert(name, value);
                }
                Some(Err(e)) => {
                    report.failures.insert(name, e);
                }
                None => {
                    report.failures.insert(name, Error::other("Task did not complete"));
                }
            }
        }
        Ok(report)
    }
}

/// Repeated names become `name#2`, `name#3`, ... so every task keeps its own entry.
fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut used = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while !used.insert(candidate.clone()) {
                n += 1;
                candidate = format!("{}#{}", name, n);
            }
            candidate
        })
        .collect()
}

/// Turn a panic inside a task into an ordinary failure.
async fn guarded<T, Fut>(task: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::other(format!("Task panicked: {}", message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn job(n: usize, fail: bool) -> (String, impl Future<Output = Result<usize>> + Send + 'static) {
        (format!("task-{}", n), async move {
            tokio::time::sleep(Duration::from_millis((10 - n % 10) as u64)).await;
            if fail {
                Err(Error::other(format!("task {} failed", n)))
            } else {
                Ok(n * 2)
            }
        })
    }

    #[tokio::test]
    async fn test_serial_below_threshold() {
        let pool = TaskPool::new(5, 20);
        let report = pool.run((0..3).map(|n| job(n, false)).collect()).await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.success_count, 3);
        assert_eq!(report.results.values().copied().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_parallel_keeps_submission_order() {
        let pool = TaskPool::new(2, 4);
        let report = pool.run((0..12).map(|n| job(n, false)).collect()).await.unwrap();
        let keys: Vec<_> = report.results.keys().cloned().collect();
        let expected: Vec<_> = (0..12).map(|n| format!("task-{}", n)).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_failures_do_not_cancel_peers() {
        let pool = TaskPool::new(2, 10);
        let report = pool.run((0..50).map(|n| job(n, n == 17)).collect()).await.unwrap();
        assert_eq!(report.success_count, 49);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures.contains_key("task-17"));

        let err = report.into_result("extend volumes").unwrap_err();
        assert!(err.to_string().contains("task-17"));
    }

    #[tokio::test]
    async fn test_in_flight_is_bounded() {
        let pool = TaskPool::new(1, 3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..10)
            .map(|n| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                (n.to_string(), async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        let report = pool.run(tasks).await.unwrap();
        assert_eq!(report.success_count, 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_repeated_names_keep_every_outcome() {
        let pool = TaskPool::new(1, 4);
        let tasks: Vec<_> = [(1, true), (2, false), (3, true), (4, false)]
            .into_iter()
            .map(|(n, fail)| ("vol".to_string(), job(n, fail).1))
            .collect();
        let report = pool.run(tasks).await.unwrap();
        assert_eq!(report.total(), 4);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failures.keys().cloned().collect::<Vec<_>>(), vec!["vol", "vol#3"]);
        assert_eq!(report.results.keys().cloned().collect::<Vec<_>>(), vec!["vol#2", "vol#4"]);
    }

    #[test]
    fn test_unique_names() {
        let names = ["a", "a", "a#2", "b"].map(String::from).to_vec();
        assert_eq!(unique_names(names), vec!["a", "a#2", "a#2#2", "b"]);
    }

    #[tokio::test]
    async fn test_panic_is_a_failure() {
        let pool = TaskPool::new(1, 2);
        async fn one() -> Result<u32> {
            Ok(1)
        }
        async fn explode() -> Result<u32> {
            panic!("exploded")
        }
        let tasks: Vec<(String, futures::future::BoxFuture<'static, Result<u32>>)> = vec![
            ("ok".to_string(), Box::pin(one())),
            ("boom".to_string(), Box::pin(explode())),
        ];
        let report = pool.run(tasks).await.unwrap();
        assert_eq!(report.success_count, 1);
        assert!(report.failures["boom"].to_string().contains("exploded"));
    }
}
