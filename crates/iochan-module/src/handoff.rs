//! Moving work onto an executor without losing it.
//!
//! `TaskExecutor::submit` consumes the task even when it refuses it. The
//! backends cannot afford that: a refused job still owes its caller a
//! completion. `submit_reclaimable` parks the payload in a slot the task
//! shares, so a refusal hands the payload straight back.

use iochan_core::error::IoError;
use iochan_core::executor::TaskExecutor;
use iochan_core::shared::Shared;
use parking_lot::{Condvar, Mutex};

/// Run `f(value)` on `executor`, or get `value` back with the reason it
/// was refused.
pub fn submit_reclaimable<T, F>(
    executor: &dyn TaskExecutor,
    value: T,
    f: F,
) -> Result<(), (T, IoError)>
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    let slot = Shared::new(Mutex::new(Some(value)));
    let theirs = slot.clone();
    let submitted = executor.submit(Box::new(move || {
        let taken = theirs.lock().take();
        if let Some(v) = taken {
            f(v);
        }
    }));
    match submitted {
        Ok(()) => Ok(()),
        // An empty slot means a worker already took the value, so it has
        // been delivered after all.
        Err(e) => match slot.lock().take() {
            Some(v) => Err((v, e)),
            None => Ok(()),
        },
    }
}

/// Counter of accepted-but-undelivered jobs with a wait-for-zero.
#[derive(Default)]
pub struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        *self.count.lock() += 1;
    }

    pub fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub fn get(&self) -> usize {
        *self.count.lock()
    }

    /// Block until the count drops to zero.
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::ThreadPool;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_accepted_value_is_delivered() {
        let pool = ThreadPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        submit_reclaimable(&pool, 7u32, move |v| tx.send(v).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
        pool.join();
    }

    #[test]
    fn test_refused_value_comes_back() {
        let pool = ThreadPool::new(1).unwrap();
        pool.join();
        let (value, err) = submit_reclaimable(&pool, String::from("job"), |_| {
            panic!("must not run");
        })
        .unwrap_err();
        assert_eq!(value, "job");
        assert_eq!(err, IoError::PoolShutdown);
    }

    #[test]
    fn test_inflight_wait_idle() {
        let inflight = Shared::new(Inflight::new());
        inflight.begin();
        inflight.begin();
        let worker = {
            let inflight = inflight.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                inflight.end();
                inflight.end();
            })
        };
        inflight.wait_idle();
        assert_eq!(inflight.get(), 0);
        worker.join().unwrap();
    }
}
