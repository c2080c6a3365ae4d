//! `ThreadPool`: default `TaskExecutor` implementation.
//!
//! Spawns N OS threads at creation. Workers block in `TaskQueue::poll()`,
//! run one task, and repeat. No dynamic scaling. Simple, predictable, safe.
//!
//! Shutdown (`join`) closes the queue and appends one stop marker per
//! worker in a single locked step. Markers land *behind* every task already
//! accepted, so all accepted tasks run before the workers exit, and a
//! `submit` racing the shutdown is either accepted-and-run or refused with
//! `PoolShutdown`. Nothing accepted is ever dropped.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use iochan_core::constants::MAX_WORKERS;
use iochan_core::error::{IoError, Result};
use iochan_core::executor::{Task, TaskExecutor};
use iochan_core::shared::Shared;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::task_queue::TaskQueue;

/// Item in the pool's queue.
enum Job {
    Run(Task),
    Stop,
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the pool this thread works for (0 = not a worker).
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

/// Shared state between the pool handle and its workers.
struct PoolInner {
    id: u64,
    queue: TaskQueue<Job>,
    /// Cleared when `join()` begins.
    live: AtomicBool,
    /// Workers currently executing a task.
    active: AtomicUsize,
    /// Tasks that panicked (diagnostics).
    panicked: AtomicUsize,
    total: usize,
}

pub struct ThreadPool {
    inner: Shared<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    joined: AtomicBool,
}

impl ThreadPool {
    /// Create a pool with `max_threads` workers named `iochan-worker-<i>`.
    pub fn new(max_threads: usize) -> Result<Self> {
        Self::with_name(max_threads, "iochan-worker")
    }

    /// Create a pool with `max_threads` workers named `<name>-<i>`.
    ///
    /// `max_threads == 0` is rejected: such a pool could never make
    /// progress. Counts above `MAX_WORKERS` are clamped.
    pub fn with_name(max_threads: usize, name: &str) -> Result<Self> {
        if max_threads == 0 {
            return Err(IoError::InvalidConfig("max_threads must be at least 1"));
        }
        let n = max_threads.min(MAX_WORKERS);
        let inner = Shared::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queue: TaskQueue::new(),
            live: AtomicBool::new(true),
            active: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            total: n,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = inner.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(pool = inner.id, worker_id, error = %e, "failed to spawn worker");
                    inner.live.store(false, Ordering::Release);
                    inner.queue.close_with(handles.iter().map(|_| Job::Stop));
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(IoError::ResourceExhausted("worker thread"));
                }
            }
        }
        debug!(pool = inner.id, workers = n, "thread pool started");

        Ok(Self {
            inner,
            handles: Mutex::new(handles),
            joined: AtomicBool::new(false),
        })
    }

    /// Tasks that panicked so far.
    pub fn panicked_tasks(&self) -> usize {
        self.inner.panicked.load(Ordering::Relaxed)
    }

    /// Tasks accepted but not yet claimed by a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

impl TaskExecutor for ThreadPool {
    fn submit(&self, task: Task) -> Result<()> {
        self.inner
            .queue
            .try_offer(Job::Run(task))
            .map_err(|_| IoError::PoolShutdown)
    }

    fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.with(|c| c.get()) == self.inner.id
    }

    fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn max_workers(&self) -> usize {
        self.inner.total
    }

    fn join(&self) {
        if self.joined.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.live.store(false, Ordering::Release);
        self.inner
            .queue
            .close_with((0..self.inner.total).map(|_| Job::Stop));

        let me = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == me {
                // Joined from one of our own tasks; this worker exits on its
                // own stop marker once the task returns.
                warn!(pool = self.inner.id, "join() called from a worker; not waiting on self");
                continue;
            }
            if handle.join().is_err() {
                error!(pool = self.inner.id, "worker thread panicked");
            }
        }
        debug!(pool = self.inner.id, "thread pool joined");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Shared<PoolInner>, worker_id: usize) {
    CURRENT_POOL.with(|c| c.set(inner.id));
    debug!(pool = inner.id, worker_id, "worker started");

    loop {
        match inner.queue.poll() {
            Job::Run(task) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    inner.panicked.fetch_add(1, Ordering::Relaxed);
                    error!(
                        pool = inner.id,
                        worker_id,
                        panic = panic_message(payload.as_ref()),
                        "task panicked"
                    );
                }
                inner.active.fetch_sub(1, Ordering::Relaxed);
            }
            Job::Stop => break,
        }
    }

    CURRENT_POOL.with(|c| c.set(0));
    debug!(pool = inner.id, worker_id, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
