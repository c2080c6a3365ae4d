//! # Reactor: completion-port style backend
//!
//! The reactor runs on a dedicated OS thread. It:
//! 1. Dequeues `IoJob`s from a lock-free MPSC queue
//! 2. Performs each channel call, in submission order
//! 3. Posts the completion hook to the executor's workers
//!
//! This mirrors platforms where the kernel owns the I/O threads and the
//! application pool only ever sees finished results. One reactor thread
//! serializes all I/O it performs, so a channel that blocks holds up the
//! jobs behind it; pick `PoolBackend` for slow peers.
//!
//! If the executor has been joined by the time a result is ready, the hook
//! runs on the reactor thread instead (never on the submitter) and a
//! warning is logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use iochan_core::error::{IoError, Result};
use iochan_core::executor::ExecutorRef;
use iochan_core::io_backend::{IoBackend, SubmitError};
use iochan_core::operation::{CompleteFn, Completion, IoJob};
use iochan_core::shared::Shared;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::handoff::{submit_reclaimable, Inflight};

/// Default park timeout when the request queue is empty.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(1);

/// Shared state between the reactor thread and submitters.
struct ReactorShared {
    /// MPSC queue: submitters push, reactor pops.
    requests: SegQueue<IoJob>,
    /// `true` once shut down. Held while pushing so no job slips in after
    /// the reactor's final drain.
    gate: Mutex<bool>,
    /// Tells the reactor to exit once the queue is empty.
    stopping: AtomicBool,
    executor: ExecutorRef,
    inflight: Shared<Inflight>,
    idle: Duration,
}

/// Handle to the reactor thread.
pub struct ReactorBackend {
    shared: Shared<ReactorShared>,
    reactor: Thread,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReactorBackend {
    /// Create and start the reactor.
    pub fn start(executor: ExecutorRef) -> Result<Self> {
        Self::with_idle(executor, DEFAULT_IDLE)
    }

    /// Start with a custom park timeout for the idle reactor.
    pub fn with_idle(executor: ExecutorRef, idle: Duration) -> Result<Self> {
        let shared = Shared::new(ReactorShared {
            requests: SegQueue::new(),
            gate: Mutex::new(false),
            stopping: AtomicBool::new(false),
            executor,
            inflight: Shared::new(Inflight::new()),
            idle,
        });
        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("iochan-reactor".into())
            .spawn(move || reactor_loop(loop_shared))
            .map_err(|e| {
                error!(error = %e, "failed to spawn reactor thread");
                IoError::ResourceExhausted("reactor thread")
            })?;

        Ok(Self {
            shared,
            reactor: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl IoBackend for ReactorBackend {
    fn submit(&self, job: IoJob) -> std::result::Result<(), SubmitError> {
        let gate = self.shared.gate.lock();
        if *gate {
            return Err(SubmitError { job, error: IoError::AlreadyShutdown });
        }
        trace!(op = %job.op.id, "reactor submit");
        self.shared.inflight.begin();
        self.shared.requests.push(job);
        drop(gate);
        self.reactor.unpark();
        Ok(())
    }

    fn inflight(&self) -> usize {
        self.shared.inflight.get()
    }

    fn name(&self) -> &'static str {
        "reactor"
    }

    fn shutdown(&self) {
        {
            let mut gate = self.shared.gate.lock();
            if *gate {
                return;
            }
            *gate = true;
        }
        self.shared.stopping.store(true, Ordering::Release);
        self.reactor.unpark();

        if thread::current().id() == self.reactor.id() {
            // Shut down from a hook delivered on the reactor itself; the
            // loop exits on its own once the queue is empty.
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("reactor thread panicked");
            }
        }
        if !self.shared.executor.is_worker_thread() {
            self.shared.inflight.wait_idle();
        }
        debug!("reactor shut down");
    }
}

impl Drop for ReactorBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The reactor loop. Runs on a dedicated OS thread.
fn reactor_loop(shared: Shared<ReactorShared>) {
    debug!("reactor started");
    loop {
        let mut drained = 0usize;
        while let Some(job) = shared.requests.pop() {
            let (completion, complete) = job.execute();
            deliver(&shared, completion, complete);
            drained += 1;
        }

        if shared.stopping.load(Ordering::Acquire) && shared.requests.is_empty() {
            break;
        }
        if drained == 0 {
            thread::park_timeout(shared.idle);
        }
    }
    debug!("reactor stopped");
}

/// Hand a finished result to the executor, or deliver it here if the
/// executor is gone.
fn deliver(shared: &ReactorShared, completion: Completion, complete: CompleteFn) {
    let inflight = shared.inflight.clone();
    let posted = submit_reclaimable(
        &*shared.executor,
        (completion, complete),
        move |(completion, complete)| {
            complete(completion);
            inflight.end();
        },
    );
    if let Err(((completion, complete), error)) = posted {
        warn!(op = %completion.id, %error, "executor refused completion; delivering on reactor thread");
        complete(completion);
        shared.inflight.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryReader, MemoryWriter};
    use crate::thread_pool::ThreadPool;
    use iochan_core::channel::share;
    use iochan_core::executor::TaskExecutor;
    use iochan_core::operation::{ChannelId, Operation};
    use std::sync::mpsc;

    fn executor(n: usize) -> ExecutorRef {
        Shared::from_box(Box::new(ThreadPool::new(n).unwrap()))
    }

    #[test]
    fn test_fifo_io_and_delivery_on_pool() {
        let exec = executor(1);
        let backend = ReactorBackend::start(exec.clone()).unwrap();
        let sink = MemoryWriter::new();
        let sink_ref = share(sink.clone());
        let ch = ChannelId::next();
        let (tx, rx) = mpsc::channel();

        for i in 0..20u8 {
            let tx = tx.clone();
            let exec = exec.clone();
            let op = Operation::write(ch, vec![i], 1, None).unwrap();
            backend
                .submit(IoJob::new(
                    op,
                    sink_ref.clone(),
                    Box::new(move |c| tx.send((c.result, exec.is_worker_thread())).unwrap()),
                ))
                .unwrap();
        }
        for _ in 0..20 {
            let (result, on_worker) = rx.recv().unwrap();
            assert_eq!(result, Ok(1));
            assert!(on_worker);
        }
        backend.shutdown();
        assert_eq!(sink.contents(), (0..20u8).collect::<Vec<_>>());
        exec.join();
    }

    #[test]
    fn test_delivers_on_reactor_when_pool_gone() {
        let exec = executor(1);
        exec.join();
        let backend = ReactorBackend::start(exec.clone()).unwrap();
        let (tx, rx) = mpsc::channel();
        let op = Operation::read(ChannelId::next(), Vec::new(), 3, None).unwrap();
        backend
            .submit(IoJob::new(
                op,
                share(MemoryReader::new(b"abc".to_vec())),
                Box::new(move |c| {
                    let name = thread::current().name().map(str::to_owned);
                    tx.send((c.result, name)).unwrap();
                }),
            ))
            .unwrap();
        let (result, name) = rx.recv().unwrap();
        assert_eq!(result, Ok(3));
        assert_eq!(name.as_deref(), Some("iochan-reactor"));
        backend.shutdown();
    }

    #[test]
    fn test_shutdown_drains_then_refuses() {
        let exec = executor(2);
        let backend = ReactorBackend::start(exec.clone()).unwrap();
        let (tx, rx) = mpsc::channel();
        let reader = share(MemoryReader::new(vec![9; 64]));
        for _ in 0..8 {
            let tx = tx.clone();
            let op = Operation::read(ChannelId::next(), Vec::new(), 8, None).unwrap();
            backend
                .submit(IoJob::new(op, reader.clone(), Box::new(move |c| tx.send(c.result).unwrap())))
                .unwrap();
        }
        backend.shutdown();
        assert_eq!(backend.inflight(), 0);
        drop(tx);
        assert_eq!(rx.iter().filter(|r| *r == Ok(8)).count(), 8);

        let op = Operation::read(ChannelId::next(), Vec::new(), 8, None).unwrap();
        let err = backend
            .submit(IoJob::new(op, reader, Box::new(|_| {})))
            .unwrap_err();
        assert_eq!(err.error, IoError::AlreadyShutdown);
        exec.join();
    }
}
