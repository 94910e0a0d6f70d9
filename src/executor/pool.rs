use std::sync::Arc;

use crate::config::DaemonSettings;

const LOG_TARGET: &str = "passgraph::pool";

/// Where pass collection runs.
pub(crate) enum WorkerPool {
    /// The process-wide rayon pool, shared with other background work.
    Global,
    Dedicated(Arc<rayon::ThreadPool>),
}

impl WorkerPool {
    pub(crate) fn from_settings(settings: &DaemonSettings) -> Self {
        let Some(threads) = settings.worker_threads else {
            return WorkerPool::Global;
        };
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("passgraph-worker-{index}"))
            .build()
        {
            Ok(pool) => {
                log::debug!(target: LOG_TARGET, "Started {} dedicated pass workers", threads);
                WorkerPool::Dedicated(Arc::new(pool))
            }
            Err(err) => {
                log::warn!(
                    target: LOG_TARGET,
                    "Failed to start {} pass workers, using the shared pool: {}",
                    threads,
                    err
                );
                WorkerPool::Global
            }
        }
    }

    pub(crate) fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            WorkerPool::Global => rayon::spawn(job),
            WorkerPool::Dedicated(pool) => pool.spawn(job),
        }
    }

    pub(crate) fn threads(&self) -> usize {
        match self {
            WorkerPool::Global => rayon::current_num_threads(),
            WorkerPool::Dedicated(pool) => pool.current_num_threads(),
        }
    }
}
