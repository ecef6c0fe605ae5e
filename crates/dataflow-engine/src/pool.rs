//! Bounded worker pool for node execution
//!
//! Node models run synchronously, so units of work go to the blocking
//! thread pool of a dedicated tokio runtime whose size is capped by
//! [`EngineConfig::worker_threads`]. Work submitted beyond the cap waits in
//! the runtime's queue instead of being rejected. The runtime's single async
//! worker thread drives the event dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::config::EngineConfig;
use crate::constants::threads;
use crate::error::{EngineError, Result};

pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Decrements the active count even if a job panics
struct ActiveGuard(Arc<Counters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name(threads::WORKER_NAME)
            .enable_time()
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();
        log::debug!("Worker pool started with {} threads", config.worker_threads);
        Ok(Self {
            runtime: Some(runtime),
            handle,
            counters: Arc::new(Counters::default()),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        })
    }

    /// Runtime handle, used to spawn the event dispatcher
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queue a unit of work
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        self.handle.spawn_blocking(move || {
            let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak.fetch_max(now, Ordering::SeqCst);
            let _guard = ActiveGuard(Arc::clone(&counters));
            job();
        });
    }

    /// Units currently running
    pub fn active_count(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Highest number of units that ran at the same time
    pub fn peak_count(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Units that have finished (successfully or not)
    pub fn completed_count(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            if Handle::try_current().is_ok() {
                // Blocking shutdown is not allowed from inside a runtime
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(self.shutdown_timeout);
            }
        }
    }
}
