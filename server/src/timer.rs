//! Keyed min-heap of deadlines.
//!
//! A binary min-heap ordered by deadline plus an `id -> heap index` side
//! map, so extending a live connection's deadline and cancelling a closed
//! connection's entry are both O(log n). Every sift keeps the side map in
//! step with the heap array.
//!
//! Payloads are stable handles (the reactor stores the fd), never
//! references into the connection map: an entry can outlive the connection
//! it was armed for and its expiry is then a no-op for the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TimerNode<T> {
    id: u64,
    deadline: Instant,
    payload: T,
}

/// Min-heap timer with O(log n) keyed adjustment and removal.
pub struct HeapTimer<T> {
    heap: Vec<TimerNode<T>>,
    index: HashMap<u64, usize>,
}

impl<T> HeapTimer<T> {
    pub fn new() -> HeapTimer<T> {
        HeapTimer {
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    /// Arm (or rearm) the deadline for `id`.
    ///
    /// An existing entry has its deadline and payload replaced and is
    /// re-sifted in whichever direction the new deadline requires.
    pub fn add(&mut self, id: u64, timeout: Duration, payload: T) {
        let deadline = Instant::now() + timeout;
        match self.index.get(&id).copied() {
            Some(i) => {
                self.heap[i].deadline = deadline;
                self.heap[i].payload = payload;
                self.resift(i);
            }
            None => {
                let i = self.heap.len();
                self.index.insert(id, i);
                self.heap.push(TimerNode {
                    id,
                    deadline,
                    payload,
                });
                self.sift_up(i);
            }
        }
    }

    /// Reset the deadline for `id` to `now + timeout`.
    ///
    /// Sifts in both directions: extension (the common case) sifts down,
    /// but a shortened deadline must bubble up too.
    pub fn adjust(&mut self, id: u64, timeout: Duration) {
        debug_assert!(self.index.contains_key(&id), "adjust of unknown timer id");
        if let Some(i) = self.index.get(&id).copied() {
            self.heap[i].deadline = Instant::now() + timeout;
            self.resift(i);
        }
    }

    /// Remove the entry for `id`, returning its payload.
    pub fn cancel(&mut self, id: u64) -> Option<T> {
        let i = self.index.get(&id).copied()?;
        Some(self.remove_at(i))
    }

    /// Pop every due entry, returning their payloads in deadline order.
    pub fn tick(&mut self) -> Vec<T> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(root) = self.heap.first() {
            if root.deadline > now {
                break;
            }
            expired.push(self.remove_at(0));
        }
        expired
    }

    /// Time until the earliest deadline; `None` when no entries exist
    /// (callers wait indefinitely).
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        self.heap
            .first()
            .map(|node| node.deadline.saturating_duration_since(now))
    }

    fn remove_at(&mut self, i: usize) -> T {
        debug_assert!(i < self.heap.len());
        let last = self.heap.len() - 1;
        if i < last {
            self.swap_nodes(i, last);
        }
        let node = self.heap.pop().expect("remove_at on empty heap");
        self.index.remove(&node.id);
        if i < self.heap.len() {
            self.resift(i);
        }
        node.payload
    }

    fn resift(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    // Stops explicitly at the root; (i - 1) / 2 on i == 0 would be an
    // underflow trap in disguise.
    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].deadline <= self.heap[i].deadline {
                break;
            }
            self.swap_nodes(parent, i);
            i = parent;
        }
    }

    /// Returns true if the node moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut i = start;
        loop {
            let mut child = 2 * i + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].deadline < self.heap[child].deadline {
                child += 1;
            }
            if self.heap[child].deadline >= self.heap[i].deadline {
                break;
            }
            self.swap_nodes(i, child);
            i = child;
        }
        i > start
    }

    fn swap_nodes(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }
}

impl<T> Default for HeapTimer<T> {
    fn default() -> HeapTimer<T> {
        HeapTimer::new()
    }
}
