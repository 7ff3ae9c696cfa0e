//! I/O worker pool.
//!
//! Wraps one shared reactor and its worker threads, and hands out spawn
//! handles to services and sessions. The task tracker plays the role of the
//! keep-alive guard: while it is open, `join` keeps waiting even across
//! transient queue-empty moments; `reset` closes it so the pool drains once
//! every outstanding task has finished; `stop` tears the reactor down
//! abruptly, cancelling in-flight work.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::NetError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The worker pool owning the reactor.
pub struct IoThreadPool {
    runtime: Option<Runtime>,
    tracker: TaskTracker,
}

impl IoThreadPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Start `threads` worker threads driving the reactor. Idempotent.
    pub fn run(&mut self, threads: usize) -> Result<(), NetError> {
        if self.runtime.is_some() {
            return Ok(());
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("framelink-io")
            .enable_all()
            .build()?;
        debug!(threads = threads.max(1), "I/O worker pool started");
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Start with one worker per hardware thread.
    pub fn run_default(&mut self) -> Result<(), NetError> {
        self.run(num_cpus::get())
    }

    /// A cloneable spawn handle for services and sessions.
    ///
    /// # Errors
    ///
    /// Fails when the pool has not been started.
    pub fn try_handle(&self) -> Result<IoHandle, NetError> {
        let runtime = self.runtime.as_ref().ok_or(NetError::PoolNotRunning)?;
        Ok(IoHandle {
            runtime: runtime.handle().clone(),
            tracker: self.tracker.clone(),
        })
    }

    /// Like [`try_handle`](Self::try_handle) but panics when the pool is not
    /// running; starting the pool first is part of the calling contract.
    #[must_use]
    pub fn handle(&self) -> IoHandle {
        self.try_handle().expect("I/O worker pool is not running")
    }

    /// Track and spawn a task on the pool.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle().spawn(future);
    }

    /// Drop the keep-alive guard: no new tracked work is accepted, and
    /// `join` returns once the outstanding tasks drain.
    pub fn reset(&self) {
        self.tracker.close();
        debug!("I/O worker pool keep-alive released");
    }

    /// Abrupt shutdown: cancel in-flight tasks without waiting for them.
    pub fn stop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("I/O worker pool stopped");
        }
    }

    /// Wait for tracked tasks to drain, then shut the reactor down.
    /// Idempotent; a no-op after `stop`. Call `reset` first, or this blocks
    /// until the keep-alive guard is released.
    pub fn join(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.block_on(self.tracker.wait());
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            debug!("I/O worker pool joined");
        }
    }
}

impl Default for IoThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable spawn handle onto the pool.
#[derive(Clone)]
pub struct IoHandle {
    runtime: Handle,
    tracker: TaskTracker,
}

impl IoHandle {
    /// Spawn a tracked task. After `reset` the task is dropped: shutdown has
    /// begun and nothing new may keep the pool alive.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            warn!("dropping task spawned after pool reset");
            return;
        }
        drop(self.tracker.spawn_on(future, &self.runtime));
    }

    /// Spawn a task that must not hold the pool open during drain, such as
    /// the process-wide signal watcher. It is cancelled when the reactor
    /// shuts down.
    pub fn spawn_untracked<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.runtime.spawn(future));
    }

    /// Run a future to completion from a non-reactor thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawned_work_runs_and_drains() {
        let mut pool = IoThreadPool::new();
        pool.run(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = counter.clone();
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.reset();
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn spawn_after_reset_is_dropped() {
        let mut pool = IoThreadPool::new();
        pool.run(1).unwrap();
        pool.reset();
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn join_is_idempotent() {
        let mut pool = IoThreadPool::new();
        pool.run(1).unwrap();
        pool.reset();
        pool.join();
        pool.join();
    }

    #[test]
    fn stop_cancels_in_flight_work() {
        let mut pool = IoThreadPool::new();
        pool.run(1).unwrap();
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        pool.stop();
        pool.join();
    }

    #[test]
    fn handle_requires_running_pool() {
        let pool = IoThreadPool::new();
        assert!(matches!(pool.try_handle(), Err(NetError::PoolNotRunning)));
    }
}
