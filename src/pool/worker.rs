// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fixed-size worker pool.
//!
//! A named pool of long-lived workers consuming tasks from a bounded queue.
//! Task failures are routed to the task's own `on_error` hook and never
//! stop a worker. Shutdown closes the intake, drains the buffered backlog
//! by executing it, and joins every worker.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::FleetError;

/// A unit of background work.
#[async_trait]
pub trait PoolTask: Send + Sync {
    async fn execute(&self) -> Result<(), FleetError>;

    /// Invoked by the worker when `execute` fails. Must not panic.
    fn on_error(&self, err: FleetError);
}

/// Fixed-size pool of task workers.
///
/// The task channel is buffered at `10 × workers`; `submit` waits when the
/// buffer is full. Execution order across workers is unspecified; sends are
/// FIFO into the queue.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Box<dyn PoolTask>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `workers` long-lived consumers.
    #[must_use]
    pub fn new(name: &str, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Box<dyn PoolTask>>(workers * 10);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = Arc::clone(&rx);
            let pool_name = name.to_string();
            handles.push(tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else { break };
                    if let Err(err) = task.execute().await {
                        task.on_error(err);
                    }
                }
                debug!(pool = %pool_name, worker = id, "worker exiting");
            }));
        }

        info!(pool = %name, workers, "worker pool started");
        Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Queue a task for execution. Waits if the queue is full; fails with
    /// [`FleetError::PoolClosed`] after shutdown.
    pub async fn submit(&self, task: Box<dyn PoolTask>) -> Result<(), FleetError> {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| FleetError::PoolClosed(self.name.clone())),
            None => Err(FleetError::PoolClosed(self.name.clone())),
        }
    }

    /// Queue a task without waiting. For callers that hold locks and may
    /// not block; fails with [`FleetError::PoolSaturated`] when the queue
    /// is full.
    pub fn try_submit(&self, task: Box<dyn PoolTask>) -> Result<(), FleetError> {
        let sender = self.sender.lock().clone();
        let Some(tx) = sender else {
            return Err(FleetError::PoolClosed(self.name.clone()));
        };
        tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => FleetError::PoolSaturated(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => FleetError::PoolClosed(self.name.clone()),
        })
    }

    /// Close the intake and wait for workers to drain the backlog.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        executed: Arc<AtomicUsize>,
        errored: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PoolTask for CountingTask {
        async fn execute(&self) -> Result<(), FleetError> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FleetError::NotFound("synthetic".into()))
            } else {
                Ok(())
            }
        }

        fn on_error(&self, _err: FleetError) {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_executes_submitted_tasks() {
        let pool = WorkerPool::new("test", 4);
        let executed = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            pool.submit(Box::new(CountingTask {
                executed: Arc::clone(&executed),
                errored: Arc::clone(&errored),
                fail: false,
            }))
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(executed.load(Ordering::SeqCst), 20);
        assert_eq!(errored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_hit_on_error_and_workers_continue() {
        let pool = WorkerPool::new("flaky", 2);
        let executed = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            pool.submit(Box::new(CountingTask {
                executed: Arc::clone(&executed),
                errored: Arc::clone(&errored),
                fail: i % 2 == 0,
            }))
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(executed.load(Ordering::SeqCst), 10);
        assert_eq!(errored.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new("closed", 1);
        pool.shutdown().await;

        let err = pool
            .submit(Box::new(CountingTask {
                executed: Arc::new(AtomicUsize::new(0)),
                errored: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::PoolClosed(name) if name == "closed"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_tasks() {
        // One slow-ish worker, several buffered tasks: all must run.
        let pool = WorkerPool::new("drain", 1);
        let executed = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            pool.submit(Box::new(CountingTask {
                executed: Arc::clone(&executed),
                errored: Arc::clone(&errored),
                fail: false,
            }))
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(executed.load(Ordering::SeqCst), 8);
    }
}
