//! Async channel handles.
//!
//! An `AsyncChannel` is a channel bound to an `IoContext` and a
//! `CompletionRoutine`. Submissions return immediately; each one ends in
//! exactly one routine call on a worker thread.
//!
//! Each channel has one lane per direction. At most one operation per lane
//! is inside the backend at a time; the rest wait in the lane and go out
//! after the previous routine call returns. That gives in-order delivery
//! per (channel, direction) and keeps two reads (or two writes) from ever
//! touching the native handle at once.
//!
//! Cancellation only reaches operations that have not started. When
//! `shutdown_asynchronous` finds an operation already inside a native call
//! it closes the channel, which fails or wakes that call, so shutdown never
//! waits on a silent peer. A channel unbound while idle is left open.
//!
//! Operations the backend refuses while queued in a lane are delivered from
//! a pool worker. Only when the pool itself is gone do their routines run
//! on the thread that found the refusal.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use iochan_core::channel::{Capabilities, ChannelRef};
use iochan_core::error::{IoError, Result};
use iochan_core::executor::spawn;
use iochan_core::io_backend::SubmitError;
use iochan_core::operation::{ChannelId, Completion, Direction, IoJob, OpId, OpState, Operation, Phase};
use iochan_core::shared::Shared;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::context::ContextInner;
use crate::routine::CompletionRoutine;

/// Registration of a submitted, not yet delivered operation.
struct PendingOp {
    /// Submitting thread; `cancel_pending` only touches its caller's ops.
    owner: ThreadId,
    state: Shared<OpState>,
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<Operation>,
    /// An operation of this lane is inside the backend or its routine.
    busy: bool,
}

pub(crate) struct ChannelCore {
    id: ChannelId,
    channel: ChannelRef,
    routine: Box<dyn CompletionRoutine>,
    context: Shared<ContextInner>,
    pending: Mutex<HashMap<OpId, PendingOp>>,
    lanes: [Mutex<Lane>; 2],
    /// Set under the `pending` lock, so no submission slips in after
    /// `shutdown_asynchronous` cancelled everything.
    shut_down: AtomicBool,
}

impl ChannelCore {
    pub(crate) fn new(
        channel: ChannelRef,
        routine: Box<dyn CompletionRoutine>,
        context: Shared<ContextInner>,
    ) -> Self {
        Self {
            id: ChannelId::next(),
            channel,
            routine,
            context,
            pending: Mutex::new(HashMap::new()),
            lanes: [Mutex::new(Lane::default()), Mutex::new(Lane::default())],
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    /// Hand `op` to the backend. A refusal gives the operation back.
    fn dispatch(core: &Shared<Self>, op: Operation) -> std::result::Result<(), (Operation, IoError)> {
        trace!(channel = %core.id, op = %op.id, "dispatch");
        let hook = core.clone();
        let job = IoJob::new(
            op,
            core.channel.clone(),
            Box::new(move |completion| Self::on_complete(&hook, completion)),
        );
        core.context
            .backend()
            .submit(job)
            .map_err(|SubmitError { job, error }| (job.op, error))
    }

    /// Completion hook: deliver, then start the next operation of the lane.
    fn on_complete(core: &Shared<Self>, completion: Completion) {
        let direction = completion.direction;
        Self::finish(core, completion);
        Self::advance(core, direction);
    }

    /// Dispatch the next queued operation of `direction`, or mark the lane
    /// idle. Operations the backend refuses are delivered here with the
    /// refusal.
    fn advance(core: &Shared<Self>, direction: Direction) {
        loop {
            let next = {
                let mut lane = core.lanes[direction.index()].lock();
                match lane.queue.pop_front() {
                    Some(op) => op,
                    None => {
                        lane.busy = false;
                        return;
                    }
                }
            };
            match Self::dispatch(core, next) {
                Ok(()) => return,
                Err((op, error)) => {
                    warn!(channel = %core.id, op = %op.id, %error, "backend refused queued operation");
                    Self::finish(core, op.abort(error));
                }
            }
        }
    }

    /// `advance` from a pool worker, so routines of refused operations do
    /// not run on a submitting thread.
    fn advance_on_worker(core: &Shared<Self>, direction: Direction) {
        let hook = core.clone();
        let posted = spawn(&**core.context.executor(), move || Self::advance(&hook, direction));
        if let Err(error) = posted {
            warn!(channel = %core.id, %error, "no worker left; draining lane on this thread");
            Self::advance(core, direction);
        }
    }

    /// Unregister, run the routine, and release the context's count.
    fn finish(core: &Shared<Self>, completion: Completion) {
        core.pending.lock().remove(&completion.id);

        if let Err(e) = &completion.result {
            if !e.is_terminal_outcome() {
                warn!(channel = %core.id, op = %completion.id, error = %e, "operation failed");
                core.context.record_error(e.clone());
            }
        }

        let id = completion.id;
        let handle = AsyncChannel { core: core.clone() };
        let routine = &*core.routine;
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| match completion.direction {
            Direction::Read => routine.on_receive(&handle, completion),
            Direction::Write => routine.on_send(&handle, completion),
        }));
        if delivered.is_err() {
            error!(channel = %core.id, op = %id, "completion routine panicked");
        }

        core.context.end_op();
    }

    /// Cancel every registered operation matching `pred`. True if any
    /// moved to `Cancelled`.
    fn cancel_where(&self, pending: &HashMap<OpId, PendingOp>, pred: impl Fn(&PendingOp) -> bool) -> bool {
        let cancelled = pending
            .values()
            .filter(|op| pred(op))
            .filter(|op| op.state.try_cancel())
            .count();
        if cancelled > 0 {
            debug!(channel = %self.id, cancelled, "operations cancelled");
        }
        cancelled > 0
    }
}

/// Handle to a channel bound to an `IoContext`.
///
/// Cheap to clone; all clones address the same channel.
#[derive(Clone)]
pub struct AsyncChannel {
    core: Shared<ChannelCore>,
}

impl AsyncChannel {
    pub(crate) fn from_core(core: Shared<ChannelCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> ChannelId {
        self.core.id
    }

    /// The underlying synchronous channel.
    pub fn channel(&self) -> &ChannelRef {
        &self.core.channel
    }

    pub fn capabilities(&self) -> Capabilities {
        self.core.channel.capabilities()
    }

    /// Operations submitted and not yet delivered.
    pub fn outstanding(&self) -> usize {
        self.core.pending.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.core.shut_down.load(Ordering::Acquire)
    }

    /// Read up to `byte_count` bytes into `buffer`.
    ///
    /// `offset` selects positional I/O; `None` reads at the channel cursor.
    /// The routine's `on_receive` gets the buffer back holding exactly the
    /// bytes read. A stream at its end completes with `EndOfStream`.
    pub fn submit_read(&self, buffer: Vec<u8>, byte_count: usize, offset: Option<u64>) -> Result<OpId> {
        self.check(Direction::Read)?;
        let op = Operation::read(self.core.id, buffer, byte_count, offset)?;
        self.submit(op)
    }

    /// Write the first `byte_count` bytes of `buffer`.
    ///
    /// The write may be partial; `on_send` reports how much went out.
    pub fn submit_write(&self, buffer: Vec<u8>, byte_count: usize, offset: Option<u64>) -> Result<OpId> {
        self.check(Direction::Write)?;
        let op = Operation::write(self.core.id, buffer, byte_count, offset)?;
        self.submit(op)
    }

    fn check(&self, direction: Direction) -> Result<()> {
        if self.is_shut_down() {
            return Err(IoError::AlreadyShutdown);
        }
        let caps = self.capabilities();
        match direction {
            Direction::Read if !caps.is_readable() => return Err(IoError::NotReadable),
            Direction::Write if !caps.is_writable() => return Err(IoError::NotWritable),
            _ => {}
        }
        self.core.context.accepting()
    }

    fn submit(&self, op: Operation) -> Result<OpId> {
        let core = &self.core;
        let id = op.id;
        let direction = op.direction;
        {
            let mut pending = core.pending.lock();
            if core.shut_down.load(Ordering::Acquire) {
                return Err(IoError::AlreadyShutdown);
            }
            core.context.begin_op();
            pending.insert(
                id,
                PendingOp {
                    owner: thread::current().id(),
                    state: op.state.clone(),
                },
            );
        }
        trace!(channel = %core.id, op = %id, ?direction, "submitted");

        {
            let mut lane = core.lanes[direction.index()].lock();
            if lane.busy {
                lane.queue.push_back(op);
                return Ok(id);
            }
            lane.busy = true;
        }

        if let Err((op, error)) = ChannelCore::dispatch(core, op) {
            // The context is going away. This caller gets the error
            // directly; anything queued behind is delivered with it.
            warn!(channel = %core.id, op = %op.id, %error, "backend refused operation");
            core.pending.lock().remove(&op.id);
            core.context.end_op();
            ChannelCore::advance_on_worker(core, direction);
            return Err(error);
        }
        Ok(id)
    }

    /// Cancel the operations the calling thread submitted on this channel.
    ///
    /// Cancelled operations still reach the routine, with `Cancelled`. An
    /// operation already running completes normally. Returns true if at
    /// least one operation was cancelled.
    pub fn cancel_pending(&self) -> bool {
        let me = thread::current().id();
        let pending = self.core.pending.lock();
        self.core.cancel_where(&pending, |op| op.owner == me)
    }

    /// Cancel every outstanding operation on this channel, whoever
    /// submitted it.
    pub fn cancel_all(&self) -> bool {
        let pending = self.core.pending.lock();
        self.core.cancel_where(&pending, |_| true)
    }

    /// End the context's interest in this channel.
    ///
    /// Outstanding operations are cancelled (and still delivered), later
    /// submissions fail with `AlreadyShutdown`, and the context drops its
    /// reference. An operation already running in the channel cannot be
    /// cancelled; the channel is closed to interrupt it. Never waits for
    /// operations, so it may be called from the channel's own routine.
    /// Calling it again is a no-op.
    pub fn shutdown_asynchronous(&self) {
        let running = {
            let pending = self.core.pending.lock();
            if self.core.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            self.core.cancel_where(&pending, |_| true);
            pending.values().filter(|op| op.state.phase() == Phase::Running).count()
        };
        if running > 0 {
            debug!(channel = %self.core.id, running, "closing channel to interrupt running operations");
            if let Err(e) = self.core.channel.close() {
                warn!(channel = %self.core.id, error = %e, "close during shutdown failed");
            }
        }
        self.core.context.unregister(self.core.id);
        debug!(channel = %self.core.id, "channel unbound");
    }
}

impl fmt::Debug for AsyncChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncChannel")
            .field("id", &self.core.id)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
