//! Fixed-size worker pool.
//!
//! Workers consume boxed tasks from an unbounded channel; the queue itself
//! is never a backpressure point because the reactor enqueues at most one
//! task per connection between poller rearms.

use crossbeam_channel::{Sender, unbounded};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of named worker threads.
pub struct WorkerPool {
    tx: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers.
    ///
    /// # Panics
    /// Panics if `threads` is zero.
    pub fn new(threads: usize) -> WorkerPool {
        assert!(threads > 0);
        let (tx, rx) = unbounded::<Task>();
        let handles = (0..threads)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("worker-{}", i))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            task();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool {
            tx: Some(tx),
            handles,
        }
    }

    /// Queue a task for the next free worker.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // Send fails only after shutdown; the task is dropped then.
            let _ = tx.send(Box::new(task));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnect the channel; workers drain what is queued and exit.
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
