//! Asynchronous I/O backend abstraction.
//!
//! An `IoBackend` takes an `IoJob` (operation + channel + delivery hook),
//! performs the I/O somewhere other than the submitting thread, and calls
//! the hook exactly once with the outcome.
//!
//! # Implementors (in `iochan-module`)
//!
//! - `PoolBackend`: the I/O runs on a pool worker, which then invokes the
//!   hook itself. Blocking/pollable model.
//! - `ReactorBackend`: a dedicated reactor thread performs the I/O in
//!   FIFO order and posts each hook to the pool. Completion-port model.
//!
//! The I/O context is written against this trait only; which strategy
//! runs is a configuration choice.

use thiserror::Error;

use crate::error::IoError;
use crate::operation::IoJob;
use crate::shared::Shared;

/// A job the backend refused, handed back with the reason.
#[derive(Debug, Error)]
#[error("backend refused {}: {error}", .job.op.id)]
pub struct SubmitError {
    pub job: IoJob,
    pub error: IoError,
}

/// Async I/O submission.
///
/// **Contract:**
/// - `submit()` must NEVER block and never performs the I/O on the caller.
/// - On `Ok(())` the job's hook is called exactly once, from a thread that
///   is not the submitter. On `Err(_)` the hook is never called and the
///   job comes back inside the `SubmitError`.
/// - The hook runs on a worker of the backend's executor whenever that
///   executor is still live.
pub trait IoBackend: Send + Sync {
    /// Submit a job.
    fn submit(&self, job: IoJob) -> Result<(), SubmitError>;

    /// Jobs accepted but not yet delivered.
    fn inflight(&self) -> usize;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Stop accepting jobs and deliver everything already accepted.
    /// Blocks until drained. Idempotent.
    fn shutdown(&self);
}

/// Shared handle to any backend.
pub type BackendRef = Shared<dyn IoBackend>;
