//! Bounded worker pool for the analysis tasks.
//!
//! A fixed-size rayon pool runs each submitted task and sends its result
//! back on a one-shot channel. Panics in a task are caught and reported
//! through its [`TaskHandle`]. Shutdown drops the pool and waits, up to a
//! timeout, for every worker thread to exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, warn};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] ThreadPoolBuildError),

    #[error("worker pool is shut down")]
    ShutDown,
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Outcome of waiting on a [`TaskHandle`].
#[derive(Debug)]
pub enum Joined<T> {
    Completed(T),
    /// The task panicked; carries the panic message.
    Panicked(String),
    /// The interrupt was raised before the task finished.
    Interrupted,
    /// The worker went away without reporting a result.
    Lost,
}

/// Handle to one submitted task's eventual result.
#[derive(Debug)]
pub struct TaskHandle<T> {
    name: String,
    rx: Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the task finishes or `interrupted` returns true.
    pub fn wait(&self, interrupted: impl Fn() -> bool) -> Joined<T> {
        loop {
            match self.rx.recv_timeout(JOIN_POLL_INTERVAL) {
                Ok(Ok(value)) => return Joined::Completed(value),
                Ok(Err(payload)) => return Joined::Panicked(panic_message(payload.as_ref())),
                Err(RecvTimeoutError::Disconnected) => return Joined::Lost,
                Err(RecvTimeoutError::Timeout) => {
                    if interrupted() {
                        return Joined::Interrupted;
                    }
                }
            }
        }
    }
}

pub struct WorkerPool {
    name: String,
    size: usize,
    pool: Option<ThreadPool>,
    /// Worker threads that have not run their exit handler yet.
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> PoolResult<Self> {
        let size = size.max(1);
        let live = Arc::new(AtomicUsize::new(size));

        let thread_prefix = name.to_string();
        let exited = Arc::clone(&live);
        let pool_name = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |index| format!("{}-{}", thread_prefix, index))
            .exit_handler(move |_| {
                exited.fetch_sub(1, Ordering::SeqCst);
            })
            .panic_handler(move |_| warn!("Uncaught panic in worker pool {}", pool_name))
            .build()?;

        debug!("Started worker pool {} with {} threads", name, size);
        Ok(Self {
            name: name.to_string(),
            size,
            pool: Some(pool),
            live,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Worker threads that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn submit<T, F>(&self, name: &str, task: F) -> PoolResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let pool = self.pool.as_ref().ok_or(PoolError::ShutDown)?;
        let (tx, rx) = mpsc::sync_channel(1);

        pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(task));
            let _ = tx.send(result);
        });

        Ok(TaskHandle {
            name: name.to_string(),
            rx,
        })
    }

    /// Stop accepting work and wait up to `timeout` for every worker to
    /// exit. Returns true if no worker is left running.
    ///
    /// Workers still busy with a task exit once it returns.
    pub fn shutdown_and_await(&mut self, timeout: Duration) -> bool {
        drop(self.pool.take());

        let deadline = Instant::now() + timeout;
        while self.live_workers() > 0 && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL.min(timeout));
        }

        let live = self.live_workers();
        if live > 0 {
            warn!(
                "Worker pool {} still has {} running threads after {:?}",
                self.name, live, timeout
            );
        }
        live == 0
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("live", &self.live_workers())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
