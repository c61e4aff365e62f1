use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Fixed-size pool of worker threads running task bodies.
///
/// Task bodies block their worker while waiting on products, so the pool is
/// owned by one [`Engine`](crate::Engine) and never shared with unrelated
/// rayon work.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("kiln-worker-{index}"))
            .build()?;

        Ok(Self { pool })
    }

    /// One worker, tasks run strictly in plan order.
    pub fn single() -> Result<Self, ThreadPoolBuildError> {
        Self::new(1)
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn inner(&self) -> &ThreadPool {
        &self.pool
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers())
            .finish()
    }
}
