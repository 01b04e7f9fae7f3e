//! A small fixed-size worker pool for offloading independent work such as
//! texture decoding.
//!
//! Tasks go into a mutex-protected queue and a condition variable wakes idle
//! workers. Each task carries a [`CancellationToken`]; workers check it when
//! dequeuing, so a cancelled task that has not started yet is skipped. A task
//! that is already running is never interrupted.
//!
//! [`WorkerPool::shutdown`] (also run on drop) lets the workers drain the
//! queue and waits for in-flight tasks before joining the threads.

use std::{
    collections::VecDeque,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    pin::Pin,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    thread::{self, JoinHandle},
};

use futures::channel::oneshot;
use log::{debug, info, warn};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("the task was cancelled before it ran")]
    Cancelled,
    #[error("the task panicked")]
    Panicked,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub threads: usize,
    /// Worker threads are named `{name}-{index}`.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            name: "strata-worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }
}

/// Shared flag telling workers to skip a task.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    token: CancellationToken,
    job: Job,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<QueuedTask>,
    shutting_down: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    name: String,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `config.threads` workers (at least one).
    pub fn new(config: PoolConfig) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let threads = config.threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.name, i))
                .spawn(move || worker_loop(&shared))?;
            workers.push(handle);
        }
        info!("Worker pool {} started with {} threads", config.name, threads);
        Ok(Self {
            shared,
            workers,
            name: config.name,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /**
     * Queue `task` and return a handle to its result.
     *
     * After [`shutdown`](Self::shutdown) nothing runs any more: the task is
     * dropped and its handle resolves to [`TaskError::Cancelled`].
     */
    pub fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let token = CancellationToken::new();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).map_err(|_| TaskError::Panicked);
            // The receiver may be gone; nobody is waiting then
            let _ = tx.send(result);
        });

        let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.shutting_down {
            warn!("Task submitted to pool {} after shutdown, dropping it", self.name);
        } else {
            queue.tasks.push_back(QueuedTask {
                token: token.clone(),
                job,
            });
            self.shared.available.notify_one();
        }
        TaskHandle { rx, token }
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).tasks.len()
    }

    /// Stop accepting work, let the workers drain the queue and join them.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        {
            let mut queue = self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.shutting_down = true;
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("A worker of pool {} exited by panicking", self.name);
            }
        }
        info!("Worker pool {} stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutting_down {
                    return;
                }
                queue = shared.available.wait(queue).unwrap_or_else(PoisonError::into_inner);
            }
        };
        if task.token.is_cancelled() {
            debug!("Skipping cancelled task");
            continue;
        }
        (task.job)();
    }
}

/// The result of a submitted task. Can be waited on or awaited.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
    token: CancellationToken,
}

impl<T> TaskHandle<T> {
    /// Skip the task if no worker has picked it up yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Block the current thread until the task finished or was skipped.
    pub fn wait(self) -> Result<T, TaskError> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}
