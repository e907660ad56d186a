//! Bounded blocking producer/consumer queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A fixed-capacity queue with blocking push and pop.
///
/// `close` wakes every waiter and makes subsequent operations fail fast;
/// `flush` wakes a single consumer so a shutdown path can drain what is
/// left before tearing down.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    consumer: Condvar,
    producer: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> BoundedQueue<T> {
        assert!(capacity > 0);
        BoundedQueue {
            capacity,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            consumer: Condvar::new(),
            producer: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.queue.len() >= self.capacity
    }

    /// Append to the tail, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before the item was accepted.
    pub fn push_back(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() >= self.capacity {
            if inner.closed {
                return false;
            }
            inner = self.producer.wait(inner).unwrap();
        }
        if inner.closed {
            return false;
        }
        inner.queue.push_back(item);
        self.consumer.notify_one();
        true
    }

    /// Prepend to the head, blocking while the queue is full.
    pub fn push_front(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() >= self.capacity {
            if inner.closed {
                return false;
            }
            inner = self.producer.wait(inner).unwrap();
        }
        if inner.closed {
            return false;
        }
        inner.queue.push_front(item);
        self.consumer.notify_one();
        true
    }

    /// Non-blocking append; hands the item back when full or closed.
    pub fn try_push_back(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || inner.queue.len() >= self.capacity {
            return Err(item);
        }
        inner.queue.push_back(item);
        self.consumer.notify_one();
        Ok(())
    }

    /// Pop the head, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.producer.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.consumer.wait(inner).unwrap();
        }
    }

    /// Pop the head, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or closure.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.producer.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let (guard, result) = self.consumer.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() {
                return inner.queue.pop_front().inspect(|_| {
                    self.producer.notify_one();
                });
            }
        }
    }

    /// Clone of the head item without removing it.
    pub fn front(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().unwrap().queue.front().cloned()
    }

    /// Clone of the tail item without removing it.
    pub fn back(&self) -> Option<T>
    where
        T: Clone,
    {
        self.inner.lock().unwrap().queue.back().cloned()
    }

    /// Close the queue: discard queued items and wake every waiter.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.closed = true;
        self.consumer.notify_all();
        self.producer.notify_all();
    }

    /// Wake one consumer (used to drain before shutdown).
    pub fn flush(&self) {
        self.consumer.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::with_capacity(4);
        assert!(q.push_back(1));
        assert!(q.push_back(2));
        assert!(q.push_front(0));
        assert_eq!(q.front(), Some(0));
        assert_eq!(q.back(), Some(2));
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert!(q.is_empty());
    }

    #[test]
    fn test_try_push_back_rejects_when_full() {
        let q = BoundedQueue::with_capacity(2);
        assert!(q.try_push_back(1).is_ok());
        assert!(q.try_push_back(2).is_ok());
        assert!(q.is_full());
        assert_eq!(q.try_push_back(3), Err(3));
    }

    #[test]
    fn test_pop_timeout_expires_on_empty_queue() {
        let q: BoundedQueue<u8> = BoundedQueue::with_capacity(2);
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let q: Arc<BoundedQueue<u8>> = Arc::new(BoundedQueue::with_capacity(2));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(!q.push_back(1));
        assert_eq!(q.try_push_back(2), Err(2));
    }

    #[test]
    fn test_full_queue_unblocks_when_consumed() {
        let q = Arc::new(BoundedQueue::with_capacity(1));
        assert!(q.push_back(1));
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.push_back(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn test_producer_consumer_transfers_everything() {
        let q = Arc::new(BoundedQueue::with_capacity(8));
        let consumer = {
            let q = q.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = q.pop() {
                    seen.push(v);
                }
                seen
            })
        };
        for i in 0..1000 {
            assert!(q.push_back(i));
        }
        while !q.is_empty() {
            q.flush();
            thread::yield_now();
        }
        q.close();
        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
