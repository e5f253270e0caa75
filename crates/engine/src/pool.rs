//! Worker threads that run script executions.
//!
//! A dedicated tokio runtime supplies the threads: each job is a blocking
//! task, and `max_blocking_threads` caps how many run at once (jobs beyond
//! the cap queue until a thread frees up). A [`TaskTracker`] counts
//! outstanding jobs for the shutdown drain and a [`CancellationToken`] tells
//! queued jobs that shutdown has begun.
//!
//! The pool is driven from plain threads. `drain` and `shutdown` block and
//! must not be called from inside an async context.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{EngineError, EngineResult};

/// Blocking thread cap when no bound is configured.
const UNBOUNDED_WORKERS: usize = 512;

pub struct WorkerPool {
    runtime: Mutex<Option<Runtime>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Build a pool; `max_workers` of `None` means effectively unbounded.
    pub fn new(max_workers: Option<usize>) -> EngineResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_workers.unwrap_or(UNBOUNDED_WORKERS).max(1))
            .thread_name("eashell-worker")
            .enable_time()
            .build()?;

        tracing::debug!(max_workers = ?max_workers, "Worker pool started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Queue `job` on a worker thread.
    ///
    /// The job receives the pool's cancellation token; if it is already
    /// cancelled when the job starts, the job should wind down instead of
    /// doing its work.
    pub fn submit<F>(&self, job: F) -> EngineResult<()>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let runtime = self.runtime();
        let Some(runtime) = runtime.as_ref() else {
            return Err(EngineError::PoolClosed);
        };
        if self.tracker.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let token = self.cancel.clone();
        self.tracker
            .spawn_blocking_on(move || job(token), runtime.handle());
        Ok(())
    }

    /// Jobs queued or running.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting jobs and cancel the ones not yet started.
    pub fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Wait up to `timeout` for outstanding jobs, then release the runtime.
    ///
    /// Returns `true` if every job finished in time. Jobs still running after
    /// the timeout are left to finish on their own threads.
    pub fn drain(&self, timeout: Duration) -> bool {
        self.close();
        let Some(runtime) = self.runtime().take() else {
            return self.tracker.is_empty();
        };

        let tracker = self.tracker.clone();
        let drained = runtime
            .block_on(async move { tokio::time::timeout(timeout, tracker.wait()).await })
            .is_ok();
        if drained {
            tracing::info!("Worker pool drained");
        } else {
            tracing::warn!(
                outstanding = self.tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Worker pool drain timed out, abandoning remaining jobs",
            );
        }
        runtime.shutdown_background();
        drained
    }

    /// Close and drain in one call.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.close();
        self.drain(timeout)
    }

    fn runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a runtime waits for its blocking tasks; never hold up exit.
        if let Some(runtime) = self.runtime().take() {
            self.cancel.cancel();
            runtime.shutdown_background();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
