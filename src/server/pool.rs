//! Fixed-size worker pool with blocking admission.
//!
//! ```text
//!  accept loop ──submit()──> [idle permit] ──> queue ──> worker 0..N
//!                   │                                      │
//!                   └── waits while all N workers are busy ┘
//! ```
//!
//! `submit` first takes an idle-worker permit, so a task is only queued
//! when some worker is free to pick it up. A worker releases its permit
//! when the task finishes. The pool never runs more than N tasks at once.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

struct Job<T> {
    task: T,
    permit: OwnedSemaphorePermit,
}

/// A pool of `size` workers draining one shared queue.
pub struct WorkerPool<T> {
    sender: mpsc::Sender<Job<T>>,
    idle: Arc<Semaphore>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Starts `size` workers, each running `handler` on one task at a time.
    ///
    /// A panicking task is logged and its worker carries on.
    pub fn new<F, Fut>(size: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job<T>>(size);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let workers = (0..size)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(Job { task, permit }) = job else {
                            break;
                        };

                        trace!(worker = id, "Worker picked up task");
                        if let Err(e) = tokio::spawn(handler(task)).await {
                            error!(worker = id, error = %e, "Worker task panicked");
                        }
                        drop(permit);
                    }
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender,
            idle: Arc::new(Semaphore::new(size)),
            workers,
        }
    }

    /// Hands a task to the pool, waiting until a worker is idle.
    pub async fn submit(&self, task: T) -> Result<(), PoolError> {
        let permit = Arc::clone(&self.idle)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        self.sender
            .send(Job { task, permit })
            .await
            .map_err(|_| PoolError::Closed)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Workers not currently running a task.
    pub fn idle_workers(&self) -> usize {
        self.idle.available_permits()
    }

    /// Stops accepting tasks and waits for running ones to finish.
    pub async fn shutdown(self) {
        self.idle.close();
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_test::{assert_ok, assert_pending, task};

    #[tokio::test]
    async fn test_runs_every_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let pool = WorkerPool::new(3, move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });

        for n in 1..=10 {
            assert_ok!(pool.submit(n).await);
        }
        pool.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 55);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_all_workers_busy() {
        let pool = WorkerPool::new(2, |release: oneshot::Receiver<()>| async move {
            let _ = release.await;
        });

        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        let (third_tx, third_rx) = oneshot::channel();

        pool.submit(first_rx).await.unwrap();
        pool.submit(second_rx).await.unwrap();

        let mut third = task::spawn(pool.submit(third_rx));
        assert_pending!(third.poll());
        drop(third);

        // Free one worker; admission must succeed now
        first_tx.send(()).unwrap();
        let (fourth_tx, fourth_rx) = oneshot::channel::<()>();
        tokio::time::timeout(Duration::from_secs(2), pool.submit(fourth_rx))
            .await
            .expect("admission did not resume after a worker freed up")
            .unwrap();

        drop(third_tx);
        second_tx.send(()).unwrap();
        fourth_tx.send(()).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_never_exceeds_pool_size() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let pool = WorkerPool::new(4, move |_: ()| {
            let running = Arc::clone(&r);
            let peak = Arc::clone(&p);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        });

        for _ in 0..20 {
            pool.submit(()).await.unwrap();
        }
        pool.shutdown().await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let pool = WorkerPool::new(1, move |fail: bool| {
            let counter = Arc::clone(&counter);
            async move {
                if fail {
                    panic!("task failure");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        pool.submit(true).await.unwrap();
        pool.submit(false).await.unwrap();
        pool.shutdown().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_workers() {
        let pool = WorkerPool::new(3, |_: ()| async {});
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.idle_workers(), 3);
        pool.shutdown().await;
    }
}
