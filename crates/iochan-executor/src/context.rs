//! # IoContext: binds async channels, a backend and a thread pool
//!
//! ```text
//! submit_read/submit_write ──► lane ──► IoBackend ──► channel call
//!                                                         │
//!            CompletionRoutine ◄── pool worker ◄──────────┘
//! ```
//!
//! The context counts every submitted operation until its routine call
//! returns. `await_asynchronous` blocks until that count is zero and then
//! reports the first real error seen since the previous wait.
//!
//! Each bound channel is held in the context's registry until
//! `shutdown_asynchronous` (or context shutdown) drops it, so a channel
//! with work in flight cannot disappear under the backend.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};

use iochan_core::channel::{share, Capabilities, ChannelRef};
use iochan_core::error::{IoError, Result};
use iochan_core::executor::ExecutorRef;
use iochan_core::io_backend::BackendRef;
use iochan_core::operation::ChannelId;
use iochan_core::shared::Shared;
use iochan_module::{PoolBackend, ReactorBackend, SocketChannel, ThreadPool};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::async_channel::{AsyncChannel, ChannelCore};
use crate::config::{BackendKind, ContextConfig};
use crate::routine::CompletionRoutine;

struct Quiescence {
    outstanding: usize,
    /// First non-terminal error since the last `await_asynchronous`.
    first_error: Option<IoError>,
}

/// State shared by the context handle and every bound channel.
pub(crate) struct ContextInner {
    executor: ExecutorRef,
    backend: BackendRef,
    registry: Mutex<HashMap<ChannelId, Shared<ChannelCore>>>,
    quiescence: Mutex<Quiescence>,
    idle: Condvar,
    /// Set under the registry lock once shutdown begins.
    closed: AtomicBool,
}

impl ContextInner {
    pub(crate) fn backend(&self) -> &BackendRef {
        &self.backend
    }

    pub(crate) fn executor(&self) -> &ExecutorRef {
        &self.executor
    }

    /// Whether new operations may be submitted.
    pub(crate) fn accepting(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(IoError::AlreadyShutdown)
        } else if !self.executor.is_live() {
            Err(IoError::PoolShutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn begin_op(&self) {
        self.quiescence.lock().outstanding += 1;
    }

    pub(crate) fn end_op(&self) {
        let mut q = self.quiescence.lock();
        q.outstanding = q.outstanding.saturating_sub(1);
        if q.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn record_error(&self, error: IoError) {
        let mut q = self.quiescence.lock();
        if q.first_error.is_none() {
            q.first_error = Some(error);
        }
    }

    fn register(&self, core: Shared<ChannelCore>) -> Result<()> {
        let mut registry = self.registry.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(IoError::AlreadyShutdown);
        }
        registry.insert(core.id(), core);
        Ok(())
    }

    pub(crate) fn unregister(&self, id: ChannelId) {
        self.registry.lock().remove(&id);
    }

    fn wait_quiescent(&self) {
        let mut q = self.quiescence.lock();
        while q.outstanding > 0 {
            self.idle.wait(&mut q);
        }
    }
}

/// The I/O context.
///
/// Shutting down (explicitly or on drop) unbinds every channel, waits for
/// the outstanding operations, stops the backend and, when the context
/// created its own pool, joins the pool.
pub struct IoContext {
    inner: Shared<ContextInner>,
    backend_kind: BackendKind,
    owns_executor: bool,
    shut: AtomicBool,
}

impl IoContext {
    /// Context configured from the environment (`ContextConfig::from_env`).
    pub fn create() -> Result<Self> {
        Self::new(ContextConfig::from_env())
    }

    /// Context with its own thread pool.
    pub fn new(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::with_name(config.workers, &config.thread_name)?;
        let executor: ExecutorRef = Shared::from_box(Box::new(pool));
        Self::build(&config, executor, true)
    }

    /// Context running on an existing executor. The executor is shared,
    /// not owned: context shutdown leaves it running.
    pub fn with_executor(config: ContextConfig, executor: ExecutorRef) -> Result<Self> {
        if !executor.is_live() {
            return Err(IoError::PoolShutdown);
        }
        Self::build(&config, executor, false)
    }

    fn build(config: &ContextConfig, executor: ExecutorRef, owns_executor: bool) -> Result<Self> {
        let backend: BackendRef = match config.backend {
            BackendKind::Pool => Shared::from_box(Box::new(PoolBackend::new(executor.clone()))),
            BackendKind::Reactor => Shared::from_box(Box::new(ReactorBackend::with_idle(
                executor.clone(),
                config.reactor_idle,
            )?)),
        };
        info!(
            backend = backend.name(),
            workers = executor.max_workers(),
            "io context created"
        );
        Ok(Self {
            inner: Shared::new(ContextInner {
                executor,
                backend,
                registry: Mutex::new(HashMap::new()),
                quiescence: Mutex::new(Quiescence { outstanding: 0, first_error: None }),
                idle: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
            backend_kind: config.backend,
            owns_executor,
            shut: AtomicBool::new(false),
        })
    }

    /// Resolve and connect synchronously. The channel is not bound to any
    /// routine; pass it to `client_connect_async` for async use.
    pub fn client_connect_blocking(&self, endpoint: impl ToSocketAddrs) -> Result<ChannelRef> {
        Ok(share(SocketChannel::connect(endpoint)?))
    }

    /// Bind `channel` to this context with `routine`.
    ///
    /// The context keeps a reference to the channel until it is shut down.
    /// Fails with `Unsupported` if the channel cannot be used
    /// asynchronously.
    pub fn client_connect_async<R>(&self, channel: ChannelRef, routine: R) -> Result<AsyncChannel>
    where
        R: CompletionRoutine + 'static,
    {
        if !channel.capabilities().contains(Capabilities::ASYNC) {
            return Err(IoError::Unsupported("channel cannot be bound to an io context"));
        }
        self.inner.accepting()?;
        let core = Shared::new(ChannelCore::new(channel, Box::new(routine), self.inner.clone()));
        self.inner.register(core.clone())?;
        debug!(channel = %core.id(), "channel bound");
        Ok(AsyncChannel::from_core(core))
    }

    /// `client_connect_blocking` followed by `client_connect_async`.
    pub fn connect_async<R>(&self, endpoint: impl ToSocketAddrs, routine: R) -> Result<AsyncChannel>
    where
        R: CompletionRoutine + 'static,
    {
        let channel = self.client_connect_blocking(endpoint)?;
        self.client_connect_async(channel, routine)
    }

    /// Block until no operation is outstanding on any bound channel.
    ///
    /// Returns the first error (other than `Cancelled` / `EndOfStream`)
    /// that an operation completed with since the previous call. From a
    /// worker of this context's pool it returns `WouldDeadlock` instead of
    /// waiting on itself.
    pub fn await_asynchronous(&self) -> Result<()> {
        if self.inner.executor.is_worker_thread() {
            return Err(IoError::WouldDeadlock);
        }
        let mut q = self.inner.quiescence.lock();
        while q.outstanding > 0 {
            self.inner.idle.wait(&mut q);
        }
        match q.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The pool delivering completions; other subsystems may submit to it.
    pub fn executor(&self) -> ExecutorRef {
        self.inner.executor.clone()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    /// Channels currently bound.
    pub fn channel_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Operations submitted and not yet delivered, across all channels.
    pub fn outstanding(&self) -> usize {
        self.inner.quiescence.lock().outstanding
    }

    /// Unbind every channel, drain, and stop the backend (and the pool, if
    /// this context created it). Channels caught inside a native call are
    /// closed so the drain does not wait on the peer. Idempotent.
    pub fn shutdown(&self) {
        if self.shut.swap(true, Ordering::AcqRel) {
            return;
        }
        let cores: Vec<_> = {
            let registry = self.inner.registry.lock();
            self.inner.closed.store(true, Ordering::Release);
            registry.values().cloned().collect()
        };
        for core in cores {
            AsyncChannel::from_core(core).shutdown_asynchronous();
        }

        let on_worker = self.inner.executor.is_worker_thread();
        if !on_worker {
            self.inner.wait_quiescent();
        }
        self.inner.backend.shutdown();
        if self.owns_executor {
            self.inner.executor.join();
        }
        self.inner.registry.lock().clear();
        debug!(on_worker, "io context shut down");
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
