//! `PoolBackend`: default `IoBackend` implementation.
//!
//! Each job becomes one pool task: the worker that claims it performs the
//! (blocking) channel call and then invokes the completion hook itself.
//! This is the pollable/blocking model: no extra threads, and a slow
//! channel only ties up the worker serving it.

use std::sync::atomic::{AtomicBool, Ordering};

use iochan_core::error::IoError;
use iochan_core::executor::ExecutorRef;
use iochan_core::io_backend::{IoBackend, SubmitError};
use iochan_core::operation::IoJob;
use iochan_core::shared::Shared;
use tracing::{debug, trace};

use crate::handoff::{submit_reclaimable, Inflight};

pub struct PoolBackend {
    executor: ExecutorRef,
    inflight: Shared<Inflight>,
    closed: AtomicBool,
}

impl PoolBackend {
    pub fn new(executor: ExecutorRef) -> Self {
        Self {
            executor,
            inflight: Shared::new(Inflight::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl IoBackend for PoolBackend {
    fn submit(&self, job: IoJob) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SubmitError { job, error: IoError::AlreadyShutdown });
        }
        trace!(op = %job.op.id, "pool backend submit");
        self.inflight.begin();
        let inflight = self.inflight.clone();
        submit_reclaimable(&*self.executor, job, move |job| {
            job.run();
            inflight.end();
        })
        .map_err(|(job, error)| {
            self.inflight.end();
            SubmitError { job, error }
        })
    }

    fn inflight(&self) -> usize {
        self.inflight.get()
    }

    fn name(&self) -> &'static str {
        "pool"
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A worker waiting for its own job would never wake.
        if !self.executor.is_worker_thread() && self.executor.is_live() {
            self.inflight.wait_idle();
        }
        debug!("pool backend shut down");
    }
}

impl Drop for PoolBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
