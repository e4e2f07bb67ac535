//! Supervised background work.
//!
//! Remote replica calls outlive the request that started them: once a write
//! reaches quorum the remaining calls keep running so their outcomes still
//! reach the circuit breaker. They are spawned here rather than with a bare
//! `tokio::spawn` so shutdown can wait for them or abort them.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` onto the current runtime, reaping finished tasks first.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!("Background task panicked: {}", e);
            }
        }
        tasks.spawn(task);
    }

    /// Tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `grace` for outstanding tasks, then aborts the rest.
    ///
    /// Returns the number of tasks abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let finished = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }
        let abandoned = tasks.len();
        tracing::warn!("Aborting {} background tasks after {:?}", abandoned, grace);
        tasks.abort_all();
        abandoned
    }
}
