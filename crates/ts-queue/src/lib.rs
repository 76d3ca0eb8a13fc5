//! FIFO work queues linking pipeline stages.
//!
//! Queues are unbounded in principle — depth is policed upstream by pool
//! capacity, since a producer can only enqueue a message once it has taken a
//! buffer from a pool, and pools are finite. Writers never block on queue
//! depth; a reader that finds the queue empty sleeps for a short interval
//! and retries rather than parking on a condition variable, matching the
//! one-thread-per-stage, poll-driven suspension model the rest of the
//! pipeline uses for its socket and pool waits.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct WorkQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a message. Never blocks.
    pub fn put_front(&self, msg: T) {
        self.inner.lock().push_back(msg);
    }

    /// Consume the oldest message, if one is available immediately.
    pub fn try_take_back(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Consume the oldest message, polling every 1 ms until `timeout`
    /// elapses. `None` timeout polls forever.
    pub fn take_back(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(msg) = self.try_take_back() {
                return Some(msg);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return None;
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_ordering_preserved() {
        let q = WorkQueue::new();
        q.put_front(1);
        q.put_front(2);
        q.put_front(3);
        assert_eq!(q.try_take_back(), Some(1));
        assert_eq!(q.try_take_back(), Some(2));
        assert_eq!(q.try_take_back(), Some(3));
        assert_eq!(q.try_take_back(), None);
    }

    #[test]
    fn take_back_times_out_on_empty_queue() {
        let q: WorkQueue<u32> = WorkQueue::new();
        let start = Instant::now();
        let got = q.take_back(Some(Duration::from_millis(20)));
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn take_back_wakes_once_a_writer_appends() {
        let q = Arc::new(WorkQueue::new());
        let writer = Arc::clone(&q);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            writer.put_front(42);
        });
        let got = q.take_back(Some(Duration::from_secs(1)));
        assert_eq!(got, Some(42));
    }
}
