//! Bounded Request Dispatcher
//!
//! Every request handler runs on a fixed pool of workers fed from a LIFO
//! buffer. Under overload the newest requests, whose clients are most likely
//! still waiting, are served first.
//!
//! ## Admission
//! 1. If the buffer has room, or a worker is idle, the job is pushed and a
//!    worker is woken. With a zero-capacity buffer this is a direct hand-off.
//! 2. Otherwise, if fewer than `max_workers` are alive, a surge worker is
//!    started with the job. Surge workers exit after `keep_alive` without work.
//! 3. Otherwise the job is rejected immediately with `Overloaded`.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinSet;

use crate::config::DispatcherConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Worker pool and queue are saturated")]
    Overloaded,
    #[error("Dispatcher is shutting down")]
    ShuttingDown,
    /// The handler panicked or was dropped before producing a result.
    #[error("Request handler did not complete")]
    Abandoned,
}

struct WorkQueue {
    /// LIFO work buffer; the newest job is at the end.
    jobs: Vec<Job>,
    /// Workers parked waiting for a job.
    idle: usize,
}

struct Inner {
    config: DispatcherConfig,
    queue: Mutex<WorkQueue>,
    notify: Notify,
    live_workers: AtomicUsize,
    closed: AtomicBool,
}

/// Cloneable handle to the pool. Workers only hold `Inner`; the last handle
/// dropped drops the `JoinSet` and with it every worker.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
    workers: Arc<Mutex<JoinSet<()>>>,
}

impl Dispatcher {
    /// Starts the core workers on the current runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        let core_workers = config.core_workers.max(1);
        let config = DispatcherConfig {
            core_workers,
            max_workers: config.max_workers.max(core_workers),
            ..config
        };

        let inner = Arc::new(Inner {
            queue: Mutex::new(WorkQueue {
                jobs: Vec::with_capacity(config.queue_capacity),
                idle: 0,
            }),
            notify: Notify::new(),
            live_workers: AtomicUsize::new(core_workers),
            closed: AtomicBool::new(false),
            config,
        });

        let mut workers = JoinSet::new();
        for _ in 0..core_workers {
            workers.spawn(inner.clone().worker_loop(None, false));
        }

        tracing::info!(
            "Dispatcher started: {} core / {} max workers, queue of {}",
            core_workers,
            inner.config.max_workers,
            inner.config.queue_capacity
        );
        Self {
            inner,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Admits `job` or rejects it without blocking.
    pub fn submit<F>(&self, job: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(DispatchError::ShuttingDown);
        }
        let job: Job = Box::pin(job);

        {
            let mut queue = inner.queue.lock();
            // Jobs beyond capacity are only accepted while a parked worker
            // is there to take each of them.
            if queue.jobs.len() < inner.config.queue_capacity + queue.idle {
                queue.jobs.push(job);
                drop(queue);
                inner.notify.notify_one();
                return Ok(());
            }
        }

        if inner.reserve_surge_worker() {
            tracing::debug!("Queue full, starting surge worker");
            self.workers
                .lock()
                .spawn(inner.clone().worker_loop(Some(job), true));
            return Ok(());
        }

        tracing::warn!("Rejecting request: all workers busy and queue full");
        Err(DispatchError::Overloaded)
    }

    /// Runs `task` on the pool and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T, DispatchError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(task.await);
        })?;
        rx.await.map_err(|_| DispatchError::Abandoned)
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().jobs.len()
    }

    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::Acquire)
    }

    /// Stops admitting work, lets workers drain the buffer for up to `grace`
    /// and aborts whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!("Workers still busy after {:?}, aborting", grace);
            workers.abort_all();
        }

        let dropped = {
            let mut queue = self.inner.queue.lock();
            let dropped = queue.jobs.len();
            queue.jobs.clear();
            dropped
        };
        if dropped > 0 {
            tracing::warn!("Dropped {} queued requests on shutdown", dropped);
        }
        tracing::info!("Dispatcher stopped");
    }
}

impl Inner {
    fn reserve_surge_worker(&self) -> bool {
        self.live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.config.max_workers).then_some(live + 1)
            })
            .is_ok()
    }

    async fn worker_loop(self: Arc<Self>, first: Option<Job>, surge: bool) {
        if let Some(job) = first {
            run(job).await;
        }

        loop {
            // Register interest before checking the buffer so a push between
            // the check and the wait is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut queue = self.queue.lock();
                let next = queue.jobs.pop();
                if next.is_none() {
                    queue.idle += 1;
                }
                next
            };
            if let Some(job) = next {
                run(job).await;
                continue;
            }

            let keep_running = if self.closed.load(Ordering::Acquire) {
                false
            } else if surge {
                let woken = tokio::time::timeout(self.config.keep_alive, notified)
                    .await
                    .is_ok();
                if !woken {
                    tracing::debug!("Surge worker idle, exiting");
                }
                woken
            } else {
                notified.await;
                true
            };

            // A job handed to this worker while it was parked is still taken
            // before exiting.
            let pending = {
                let mut queue = self.queue.lock();
                queue.idle = queue.idle.saturating_sub(1);
                !queue.jobs.is_empty()
            };
            if !keep_running && !pending {
                break;
            }
        }

        self.live_workers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs one job in its own task so a panic is contained to that request.
async fn run(job: Job) {
    if let Err(e) = tokio::spawn(job).await
        && e.is_panic()
    {
        tracing::error!("Caught a panic while handling request: {}", e);
    }
}
