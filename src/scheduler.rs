//! Bounded-concurrency task scheduler.
//!
//! A single dispatch loop pulls tasks off a FIFO queue, acquires one of
//! `max_tasks` semaphore permits, and spawns the task body. The permit is
//! an owned guard moved into the spawned body, so the slot is released on
//! every exit path: success, failure, cancellation, or panic.
//!
//! Each running task is registered in a mutex-guarded map of cancellation
//! tokens keyed by task id. A deadline watchdog derived from the task's
//! timeout cancels the same token, so explicit cancellation and timeout
//! travel the same cooperative path. Cancelling an id that is not active
//! is a race-tolerant no-op.

use crate::errors::SchedulerError;
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// High-water mark for queued, not-yet-dispatched tasks. Enqueueing past
/// this blocks the caller until the dispatcher drains.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Body executed for each dispatched task.
///
/// The executor observes `cancel` at its suspension points; the scheduler
/// never hard-aborts a body, so teardown inside the executor always runs.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task: Task, cancel: CancellationToken);
}

type ActiveMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock(map: &ActiveMap) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Unregisters a task id when the body finishes, by any exit path.
struct ActiveGuard {
    id: String,
    active: ActiveMap,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

/// Receiving half of the task queue, consumed by the dispatcher.
pub struct TaskQueue {
    rx: mpsc::Receiver<Task>,
}

/// Bounded-concurrency dispatcher handle.
///
/// Cloneable-by-parts: all handles share the queue, the semaphore, and the
/// active-task registry.
pub struct TaskScheduler {
    tx: mpsc::Sender<Task>,
    active: ActiveMap,
    semaphore: Arc<Semaphore>,
    max_tasks: usize,
}

impl TaskScheduler {
    /// Create a scheduler bounded at `max_tasks` concurrent bodies.
    pub fn new(max_tasks: usize) -> (Self, TaskQueue) {
        Self::with_capacity(max_tasks, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(max_tasks: usize, queue_capacity: usize) -> (Self, TaskQueue) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        (
            Self {
                tx,
                active: Arc::new(Mutex::new(HashMap::new())),
                semaphore: Arc::new(Semaphore::new(max_tasks)),
                max_tasks,
            },
            TaskQueue { rx },
        )
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    /// Queue a task for execution. Blocks once the queue is at its
    /// high-water mark.
    pub async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        self.tx
            .send(task)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Cancel a running task by id.
    ///
    /// Returns false when the task is not currently active (already
    /// finished or never started). Callers must tolerate this race.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.active).get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of currently executing tasks.
    pub fn active_ids(&self) -> Vec<String> {
        lock(&self.active).keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Start the dispatch loop. Runs until `shutdown` is cancelled or the
    /// queue closes.
    pub fn spawn_dispatcher<E>(
        &self,
        queue: TaskQueue,
        executor: Arc<E>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        E: TaskExecutor,
    {
        let semaphore = self.semaphore.clone();
        let active = self.active.clone();
        let mut rx = queue.rx;

        tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(task) => task,
                        None => break,
                    },
                };

                // FIFO admission to the concurrency budget.
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                debug!(task = %task.id, "dispatching task");
                let executor = executor.clone();
                let active = active.clone();
                tokio::spawn(async move {
                    // The permit lives for the whole body and is dropped on
                    // every exit path, panics included.
                    let _permit = permit;

                    let cancel = CancellationToken::new();
                    lock(&active).insert(task.id.clone(), cancel.clone());
                    let _registered = ActiveGuard {
                        id: task.id.clone(),
                        active,
                    };

                    // Deadline enforcement shares the cancellation path.
                    let watchdog = {
                        let token = cancel.clone();
                        let timeout = task.timeout;
                        tokio::spawn(async move {
                            tokio::time::sleep(timeout).await;
                            token.cancel();
                        })
                    };

                    executor.execute(task, cancel).await;
                    watchdog.abort();
                });
            }
            debug!("task dispatcher stopped");
        })
    }
}
