//! Small synchronization helpers shared across the crate.
//!
//! The only primitive needed beyond what `std::sync` provides directly is a
//! counting semaphore: request futures park on one until a response arrives,
//! and connection pools use one to wait for a leased stream to come back.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore built from a mutex and a condition variable.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter and wake one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    /// Block until the counter is positive, then decrement it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `true` if a permit was acquired, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, res) = self.cond.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if res.timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn post_then_wait() {
        let sem = Semaphore::new();
        sem.post();
        sem.wait();
    }

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new());
        let other = Arc::clone(&sem);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            other.post();
        });

        sem.wait();
        handle.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires() {
        let sem = Semaphore::new();
        assert!(!sem.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn wait_timeout_acquires() {
        let sem = Semaphore::new();
        sem.post();
        assert!(sem.wait_timeout(Duration::from_millis(20)));
    }
}
