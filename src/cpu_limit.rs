//! Tools for limiting the number of concurrent CPU-bound page workers.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Never run more page workers than this, however many cores we have. Each
/// worker may hold a decoded page image and a running `tesseract` process,
/// both of which are large.
pub const MAX_WORKERS: usize = 4;

/// The default number of page workers: one per core, up to [`MAX_WORKERS`].
pub fn default_worker_count() -> usize {
    MAX_WORKERS.min(num_cpus::get()).max(1)
}

/// A fixed-size pool of worker slots.
///
/// Tasks may be spawned freely, but each one must hold a slot while it does
/// real work. The pool is the only backpressure in the pipeline.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` slots, clamped to `1..=MAX_WORKERS`.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, MAX_WORKERS);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// How many workers may run at once?
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop handing out slots. Callers still waiting in [`WorkerPool::run`]
    /// get an error, and running work is unaffected.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Call an async function while holding a slot in the pool.
    #[instrument(level = "trace", skip_all)]
    pub async fn run<Func, Fut, R>(&self, f: Func) -> Result<R>
    where
        Func: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        // Acquire a permit from the semaphore.
        let permit = self
            .semaphore
            .acquire()
            .await
            .context("Could not acquire worker slot")?;
        // Run the function while holding the permit.
        let result = f().await;
        // Release the permit.
        drop(permit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn default_worker_count_is_capped() {
        let count = default_worker_count();
        assert!(count >= 1);
        assert!(count <= MAX_WORKERS);
    }

    #[test]
    fn zero_sized_pools_get_one_slot() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[test]
    fn oversized_pools_are_capped() {
        assert_eq!(WorkerPool::new(MAX_WORKERS).size(), MAX_WORKERS);
        assert_eq!(WorkerPool::new(16).size(), MAX_WORKERS);
        assert_eq!(WorkerPool::new(usize::MAX).size(), MAX_WORKERS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_limits_concurrency() -> Result<()> {
        let pool = WorkerPool::new(2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let pool = pool.clone();
            let live = live.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(|| async {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        Ok(())
    }

    #[tokio::test]
    async fn closed_pools_refuse_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(pool.run(|| async { 1 }).await.is_err());
    }
}
