//! `TaskQueue<T>`: blocking FIFO work queue.
//!
//! Producers never block; consumers block in `poll()` until an item
//! exists. Insertion order is execution order.
//!
//! The emptiness test and the wait happen under the same mutex, and every
//! waiter re-tests emptiness after waking, so an item pushed between a
//! consumer's check and its wait is never missed.
//!
//! A queue can be *closed* with a final batch of items (see
//! `close_with`). Closing only affects `try_offer`; `push`/`offer` are the
//! raw operations and always succeed.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append without waking anyone. Amortized O(1), never blocks.
    ///
    /// A consumer already asleep in `poll()` is not woken by this call; a
    /// later `offer` or `close_with` wakes it.
    pub fn push(&self, item: T) {
        self.state.lock().items.push_back(item);
    }

    /// Append and wake one waiting consumer.
    pub fn offer(&self, item: T) {
        self.state.lock().items.push_back(item);
        self.ready.notify_one();
    }

    /// Like `offer`, but refuses (and returns the item) once closed.
    pub fn try_offer(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Close the queue and append `tail` in one step, then wake every
    /// consumer. Returns `false` (and appends nothing) if already closed.
    pub fn close_with<I>(&self, tail: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.items.extend(tail);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Remove the oldest item, blocking until one exists.
    pub fn poll(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            self.ready.wait(&mut state);
        }
    }

    /// `poll` with an upper bound on the wait.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        let _ = self
            .ready
            .wait_while_for(&mut state, |s| s.items.is_empty(), timeout);
        state.items.pop_front()
    }

    /// Remove the oldest item if there is one.
    pub fn try_poll(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = TaskQueue::new();
        for i in 0..10 {
            q.offer(i);
        }
        let out: Vec<_> = (0..10).map(|_| q.poll()).collect();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_is_silent_until_woken() {
        let q = Arc::new(TaskQueue::new());
        q.push(1u32);
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_poll(), Some(1));
        assert_eq!(q.try_poll(), None);
    }

    #[test]
    fn test_poll_blocks_until_offer() {
        let q = Arc::new(TaskQueue::new());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.poll())
        };
        thread::sleep(Duration::from_millis(20));
        q.offer("job");
        assert_eq!(consumer.join().unwrap(), "job");
    }

    #[test]
    fn test_poll_timeout_expires() {
        let q: TaskQueue<u8> = TaskQueue::new();
        assert_eq!(q.poll_timeout(Duration::from_millis(5)), None);
        q.offer(3);
        assert_eq!(q.poll_timeout(Duration::from_millis(5)), Some(3));
    }

    #[test]
    fn test_no_lost_items_many_producers_consumers() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 2500;

        let q = Arc::new(TaskQueue::new());
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    loop {
                        match q.poll() {
                            None => break,
                            Some(v) => got.push(v),
                        }
                    }
                    got
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.offer(Some(p * PER_PRODUCER + i));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        assert!(q.close_with((0..CONSUMERS).map(|_| None)));

        let mut all: Vec<usize> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_rejects_try_offer() {
        let q = TaskQueue::new();
        assert!(q.try_offer(1).is_ok());
        assert!(q.close_with([2]));
        assert!(!q.close_with([3]));
        assert_eq!(q.try_offer(4), Err(4));
        assert!(q.is_closed());
        assert_eq!(q.poll(), 1);
        assert_eq!(q.poll(), 2);
        assert!(q.is_empty());
    }
}
