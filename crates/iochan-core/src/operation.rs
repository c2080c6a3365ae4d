//! Operation descriptors and completions.
//!
//! These are the *lingua franca* between the I/O context and the async
//! backends. An `Operation` is the in-flight record of one submitted read
//! or write: it owns the caller's buffer until the matching `Completion`
//! hands it back.
//!
//! Every operation moves through `OpState`:
//!
//! ```text
//! Submitted ──try_start──▶ Running ──finish──▶ Done
//!     │
//!     └──────try_cancel──▶ Cancelled
//! ```
//!
//! Both exits from `Submitted` are a single compare-and-swap, so a
//! cancellation racing the backend resolves to exactly one winner: if the
//! cancel lands first the operation completes with `Cancelled`, otherwise
//! it runs and completes normally.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::channel::{Channel, ChannelRef};
use crate::error::{IoError, Result};
use crate::shared::Shared;

/// Unique operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct OpId(pub u64);

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

impl OpId {
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Identifier of a channel bound to an I/O context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ChannelId(pub u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// Lane index (0 = read, 1 = write).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

/// Observable phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submitted,
    Running,
    Done,
    Cancelled,
}

/// Atomic state shared between an operation and whoever may cancel it.
#[derive(Debug)]
pub struct OpState(AtomicU8);

impl OpState {
    const SUBMITTED: u8 = 0;
    const RUNNING: u8 = 1;
    const DONE: u8 = 2;
    const CANCELLED: u8 = 3;

    pub const fn new() -> Self {
        Self(AtomicU8::new(Self::SUBMITTED))
    }

    pub fn phase(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            Self::SUBMITTED => Phase::Submitted,
            Self::RUNNING => Phase::Running,
            Self::DONE => Phase::Done,
            _ => Phase::Cancelled,
        }
    }

    /// Claim the operation for execution. Fails if it was cancelled.
    #[inline]
    pub fn try_start(&self) -> bool {
        self.transition(Self::SUBMITTED, Self::RUNNING)
    }

    /// Request cancellation. Fails once the operation has started.
    #[inline]
    pub fn try_cancel(&self) -> bool {
        self.transition(Self::SUBMITTED, Self::CANCELLED)
    }

    #[inline]
    pub fn finish(&self) {
        self.0.store(Self::DONE, Ordering::Release);
    }

    #[inline]
    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for OpState {
    fn default() -> Self {
        Self::new()
    }
}

/// One submitted read or write.
#[derive(Debug)]
pub struct Operation {
    pub id: OpId,
    pub channel_id: ChannelId,
    pub direction: Direction,
    /// Owned for the duration of the operation.
    pub buffer: Vec<u8>,
    /// Bytes requested (read) or bytes to send from the front of `buffer` (write).
    pub byte_count: usize,
    /// Absolute offset for positional I/O; `None` uses the channel cursor.
    pub offset: Option<u64>,
    pub state: Shared<OpState>,
}

impl Operation {
    /// Describe a read of up to `byte_count` bytes into `buffer`.
    ///
    /// The buffer's current contents are discarded. Fails with
    /// `ResourceExhausted` if the buffer cannot grow to `byte_count`.
    pub fn read(
        channel_id: ChannelId,
        mut buffer: Vec<u8>,
        byte_count: usize,
        offset: Option<u64>,
    ) -> Result<Self> {
        buffer.clear();
        buffer
            .try_reserve_exact(byte_count)
            .map_err(|_| IoError::ResourceExhausted("read buffer"))?;
        Ok(Self::new(channel_id, Direction::Read, buffer, byte_count, offset))
    }

    /// Describe a write of the first `byte_count` bytes of `buffer`.
    pub fn write(
        channel_id: ChannelId,
        buffer: Vec<u8>,
        byte_count: usize,
        offset: Option<u64>,
    ) -> Result<Self> {
        if byte_count > buffer.len() {
            return Err(IoError::InvalidArgument("byte_count exceeds buffer length"));
        }
        Ok(Self::new(channel_id, Direction::Write, buffer, byte_count, offset))
    }

    fn new(
        channel_id: ChannelId,
        direction: Direction,
        buffer: Vec<u8>,
        byte_count: usize,
        offset: Option<u64>,
    ) -> Self {
        Self {
            id: OpId::next(),
            channel_id,
            direction,
            buffer,
            byte_count,
            offset,
            state: Shared::new(OpState::new()),
        }
    }

    /// Run the operation against `channel` unless it was cancelled first.
    ///
    /// Blocks on the channel call. Always yields exactly one completion,
    /// even when the channel panics: that surfaces as `ChannelPanicked`.
    pub fn perform(mut self, channel: &dyn Channel) -> Completion {
        if !self.state.try_start() {
            return self.into_completion(Err(IoError::Cancelled));
        }
        let direction = self.direction;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match direction {
            Direction::Read => self.perform_read(channel),
            Direction::Write => self.perform_write(channel),
        }));
        let result = outcome.unwrap_or_else(|_| {
            if direction == Direction::Read {
                self.buffer.clear();
            }
            Err(IoError::ChannelPanicked)
        });
        self.state.finish();
        self.into_completion(result)
    }

    /// Complete without touching the channel.
    pub fn abort(self, error: IoError) -> Completion {
        self.into_completion(Err(error))
    }

    fn perform_read(&mut self, channel: &dyn Channel) -> Result<usize> {
        self.buffer.resize(self.byte_count, 0);
        let res = match self.offset {
            Some(off) => channel.read_at(&mut self.buffer, off),
            None => channel.read(&mut self.buffer),
        };
        match res {
            Ok(0) if self.byte_count > 0 => {
                self.buffer.clear();
                Err(IoError::EndOfStream)
            }
            Ok(n) => {
                self.buffer.truncate(n);
                Ok(n)
            }
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    fn perform_write(&mut self, channel: &dyn Channel) -> Result<usize> {
        let data = &self.buffer[..self.byte_count];
        match self.offset {
            Some(off) => channel.write_at(data, off),
            None => channel.write(data),
        }
    }

    fn into_completion(self, result: Result<usize>) -> Completion {
        Completion {
            id: self.id,
            channel_id: self.channel_id,
            direction: self.direction,
            result,
            buffer: self.buffer,
            offset: self.offset,
        }
    }
}

/// Terminal outcome of an operation, delivered exactly once.
#[derive(Debug)]
pub struct Completion {
    pub id: OpId,
    pub channel_id: ChannelId,
    pub direction: Direction,
    /// Bytes transferred, or why the operation ended without transferring.
    pub result: Result<usize>,
    /// The submitted buffer, handed back. For reads it holds exactly the
    /// bytes received.
    pub buffer: Vec<u8>,
    pub offset: Option<u64>,
}

impl Completion {
    #[inline]
    pub fn bytes_transferred(&self) -> usize {
        *self.result.as_ref().unwrap_or(&0)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(IoError::Cancelled))
    }

    /// The bytes this operation moved.
    pub fn data(&self) -> &[u8] {
        let n = self.bytes_transferred().min(self.buffer.len());
        &self.buffer[..n]
    }
}

/// Delivery hook carried by an `IoJob`.
pub type CompleteFn = Box<dyn FnOnce(Completion) + Send + 'static>;

/// An operation bundled with its channel and delivery hook: the unit an
/// `IoBackend` accepts.
pub struct IoJob {
    pub op: Operation,
    pub channel: ChannelRef,
    pub complete: CompleteFn,
}

impl IoJob {
    pub fn new(op: Operation, channel: ChannelRef, complete: CompleteFn) -> Self {
        Self { op, channel, complete }
    }

    /// Perform the I/O on the current thread; returns the outcome and the
    /// hook still to be called.
    pub fn execute(self) -> (Completion, CompleteFn) {
        let IoJob { op, channel, complete } = self;
        let completion = op.perform(&*channel);
        (completion, complete)
    }

    /// Perform and deliver on the current thread.
    pub fn run(self) {
        let (completion, complete) = self.execute();
        complete(completion);
    }

    /// Deliver `error` without performing the I/O.
    pub fn fail(self, error: IoError) {
        let IoJob { op, complete, .. } = self;
        complete(op.abort(error));
    }
}

impl fmt::Debug for IoJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoJob").field("op", &self.op).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{share, Capabilities};
    use std::sync::Mutex;

    /// Hands out `remaining` then end-of-stream.
    struct Source {
        remaining: Mutex<Vec<u8>>,
    }

    impl Channel for Source {
        fn capabilities(&self) -> Capabilities {
            Capabilities::READ
        }

        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut rem = self.remaining.lock().unwrap();
            let n = buf.len().min(rem.len());
            buf[..n].copy_from_slice(&rem[..n]);
            rem.drain(..n);
            Ok(n)
        }
    }

    fn source(bytes: &[u8]) -> Source {
        Source { remaining: Mutex::new(bytes.to_vec()) }
    }

    #[test]
    fn test_state_machine() {
        let s = OpState::new();
        assert_eq!(s.phase(), Phase::Submitted);
        assert!(s.try_start());
        assert!(!s.try_cancel());
        s.finish();
        assert_eq!(s.phase(), Phase::Done);

        let s = OpState::new();
        assert!(s.try_cancel());
        assert!(!s.try_start());
        assert!(!s.try_cancel());
        assert_eq!(s.phase(), Phase::Cancelled);
    }

    #[test]
    fn test_read_short_then_end_of_stream() {
        let src = source(b"0123456789");
        let ch = ChannelId::next();

        let c = Operation::read(ch, Vec::new(), 4096, None).unwrap().perform(&src);
        assert_eq!(c.result, Ok(10));
        assert_eq!(c.data(), b"0123456789");

        let c = Operation::read(ch, c.buffer, 4096, None).unwrap().perform(&src);
        assert_eq!(c.result, Err(IoError::EndOfStream));
        assert!(c.buffer.is_empty());
    }

    #[test]
    fn test_zero_length_read_is_not_eos() {
        let src = source(b"");
        let c = Operation::read(ChannelId::next(), Vec::new(), 0, None)
            .unwrap()
            .perform(&src);
        assert_eq!(c.result, Ok(0));
    }

    #[test]
    fn test_cancelled_before_start() {
        let src = source(b"abc");
        let op = Operation::read(ChannelId::next(), vec![1, 2, 3], 3, None).unwrap();
        let state = op.state.clone();
        assert!(state.try_cancel());
        let c = op.perform(&src);
        assert!(c.is_cancelled());
        assert_eq!(c.bytes_transferred(), 0);
        // untouched source
        assert_eq!(src.remaining.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_write_validates_length() {
        let err = Operation::write(ChannelId::next(), vec![0; 4], 5, None).unwrap_err();
        assert!(matches!(err, IoError::InvalidArgument(_)));
    }

    #[test]
    fn test_write_on_read_only_channel() {
        let src = source(b"");
        let c = Operation::write(ChannelId::next(), b"hey".to_vec(), 3, None)
            .unwrap()
            .perform(&src);
        assert_eq!(c.result, Err(IoError::NotWritable));
        assert_eq!(c.buffer, b"hey");
    }

    struct Faulty;

    impl Channel for Faulty {
        fn capabilities(&self) -> Capabilities {
            Capabilities::READ | Capabilities::WRITE
        }

        fn read(&self, _buf: &mut [u8]) -> Result<usize> {
            panic!("driver bug")
        }

        fn write(&self, _buf: &[u8]) -> Result<usize> {
            panic!("driver bug")
        }
    }

    #[test]
    fn test_panicking_channel_still_completes() {
        let op = Operation::read(ChannelId::next(), Vec::new(), 8, None).unwrap();
        let state = op.state.clone();
        let c = op.perform(&Faulty);
        assert_eq!(c.result, Err(IoError::ChannelPanicked));
        assert!(c.buffer.is_empty());
        assert_eq!(state.phase(), Phase::Done);

        let c = Operation::write(ChannelId::next(), b"abc".to_vec(), 3, None)
            .unwrap()
            .perform(&Faulty);
        assert_eq!(c.result, Err(IoError::ChannelPanicked));
        assert_eq!(c.buffer, b"abc");
    }

    #[test]
    fn test_job_run_delivers_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let op = Operation::read(ChannelId::next(), Vec::new(), 2, None).unwrap();
        let job = IoJob::new(op, share(source(b"xyz")), Box::new(move |c| tx.send(c).unwrap()));
        job.run();
        let c = rx.recv().unwrap();
        assert_eq!(c.data(), b"xy");
        assert!(rx.try_recv().is_err());
    }
}
