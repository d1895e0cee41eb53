//! Bounded fan-out for batch operations (bulk import, multi-order preview).

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("task {0} did not complete")]
    TaskFailed(usize),
}

/// Runs at most `concurrency` tasks at a time and waits for all of them.
#[derive(Debug, Clone)]
pub struct BoundedPool {
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl BoundedPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Applies `task` to every input. Results keep the input order; a task
    /// that panics yields `PoolError::TaskFailed` for its slot.
    pub async fn run<I, T, F, Fut>(&self, inputs: Vec<I>, task: F) -> Vec<Result<T, PoolError>>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let task = Arc::new(task);
        let total = inputs.len();
        let mut set = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let task = Arc::clone(&task);
            set.spawn(async move {
                let _permit = permit;
                (index, task(input).await)
            });
        }

        let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(err) => error!(error = %err, "pool task aborted"),
            }
        }
        debug!(total, concurrency = self.concurrency, "pool drained");

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(PoolError::TaskFailed(index)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_the_concurrency_bound() {
        let pool = BoundedPool::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let results = pool
            .run((0..12).collect(), move |n: u32| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    n * 2
                }
            })
            .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        let doubled: Vec<u32> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(doubled, (0..12).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn a_panicking_task_only_fails_its_own_slot() {
        let pool = BoundedPool::new(2);
        let results = pool
            .run(vec![1, 0, 3], |n: u32| async move {
                if n == 0 {
                    panic!("bad row");
                }
                n
            })
            .await;
        assert_eq!(results[0], Ok(1));
        assert_eq!(results[1], Err(PoolError::TaskFailed(1)));
        assert_eq!(results[2], Ok(3));
    }
}
