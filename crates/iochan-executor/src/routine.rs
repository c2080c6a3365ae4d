//! Completion routines.
//!
//! A `CompletionRoutine` is bound to an async channel when it is attached
//! to a context. Every submitted operation ends in exactly one call to
//! `on_receive` (reads) or `on_send` (writes), always on a worker thread.

use iochan_core::operation::Completion;

use crate::async_channel::AsyncChannel;

/// Callbacks for finished async operations.
///
/// The channel handle passed in may be used to submit follow-up operations
/// or to shut the channel down; neither blocks.
pub trait CompletionRoutine: Send + Sync {
    fn on_receive(&self, channel: &AsyncChannel, completion: Completion);

    fn on_send(&self, channel: &AsyncChannel, completion: Completion);
}

/// Routine built from two closures.
pub struct FnRoutine<R, S> {
    on_receive: R,
    on_send: S,
}

impl<R, S> CompletionRoutine for FnRoutine<R, S>
where
    R: Fn(&AsyncChannel, Completion) + Send + Sync,
    S: Fn(&AsyncChannel, Completion) + Send + Sync,
{
    fn on_receive(&self, channel: &AsyncChannel, completion: Completion) {
        (self.on_receive)(channel, completion)
    }

    fn on_send(&self, channel: &AsyncChannel, completion: Completion) {
        (self.on_send)(channel, completion)
    }
}

/// Build a routine from an `on_receive` and an `on_send` closure.
pub fn routine_fn<R, S>(on_receive: R, on_send: S) -> FnRoutine<R, S>
where
    R: Fn(&AsyncChannel, Completion) + Send + Sync,
    S: Fn(&AsyncChannel, Completion) + Send + Sync,
{
    FnRoutine { on_receive, on_send }
}
