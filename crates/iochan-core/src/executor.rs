//! Task executor abstraction.
//!
//! A `TaskExecutor` runs deferred zero-argument tasks on background
//! threads. The I/O context delivers every completion through one, and any
//! other subsystem needing background execution (a TLS handshake
//! continuation, say) can share the same instance.
//!
//! # Implementors
//!
//! - `ThreadPool` (default, `iochan-module`): fixed set of OS threads
//!   draining a blocking FIFO queue.

use crate::error::Result;
use crate::shared::Shared;

/// A deferred unit of work. Fire-and-forget: a task reports its own
/// outcome through whatever channel it captured.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executes tasks on worker threads.
///
/// **Contract:**
/// - `submit()` never runs the task on the caller's thread and never
///   blocks. It either accepts the task (it will run exactly once) or
///   returns an error (it will never run).
/// - A task that panics does not take its worker down.
/// - After `join()` returns no worker is running and `submit()` fails with
///   `PoolShutdown`.
pub trait TaskExecutor: Send + Sync {
    /// Queue a task for execution by some worker.
    fn submit(&self, task: Task) -> Result<()>;

    /// Whether the executor still accepts tasks.
    fn is_live(&self) -> bool;

    /// Whether the calling thread is one of this executor's workers.
    fn is_worker_thread(&self) -> bool;

    /// Number of workers currently running a task.
    fn active_workers(&self) -> usize;

    /// Number of workers, fixed at creation.
    fn max_workers(&self) -> usize;

    /// Stop accepting tasks, run everything already accepted, and wait for
    /// every worker to exit. Calling it again is a no-op.
    fn join(&self);
}

/// Shared handle to any executor.
pub type ExecutorRef = Shared<dyn TaskExecutor>;

/// Convenience: submit a closure without boxing at the call site.
pub fn spawn<F>(executor: &dyn TaskExecutor, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    executor.submit(Box::new(f))
}
