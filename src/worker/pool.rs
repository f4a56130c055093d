//! Fixed-size pool of OS threads draining a bounded work queue.
//!
//! Unlike [`LossyQueue`](crate::buffer::LossyQueue), the pool never drops work:
//! `enqueue` blocks while `queue_depth` items are already waiting.

use crate::error::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Generic worker pool invoking `handler(worker_index, item)` for every
/// enqueued item. Worker indices start at 1.
pub struct WorkerPool<T> {
    sender: Mutex<Option<SyncSender<T>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `worker_count` workers (at least one) sharing a queue of
    /// `queue_depth` slots.
    pub fn new<F>(queue_depth: usize, worker_count: usize, handler: F) -> Result<Self>
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        let size = worker_count.max(1);
        let (sender, receiver) = mpsc::sync_channel(queue_depth);
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(size);
        for index in 1..=size {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let join = thread::Builder::new()
                .name(format!("tsdb-worker-{index}"))
                .spawn(move || worker_loop(index, receiver, handler))?;
            workers.push(join);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Hand `item` to the next idle worker, blocking while the queue is full.
    pub fn enqueue(&self, item: T) -> Result<()> {
        // Clone the sender so a blocked enqueue does not hold the lock `close` needs.
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::Closed("worker pool"))?;
        sender.send(item).map_err(|_| Error::Closed("worker pool"))
    }

    /// Stop accepting work. Items already queued or running still complete.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Wait for every worker to exit. Only returns after [`close`](Self::close).
    pub fn wait(&self) {
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        // Dropping the sender lets idle workers observe the disconnect and exit.
        self.sender
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

fn worker_loop<T, F>(index: usize, receiver: Arc<Mutex<Receiver<T>>>, handler: Arc<F>)
where
    F: Fn(usize, T),
{
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(item) = next else {
            debug!(worker = index, "work queue closed");
            return;
        };
        if panic::catch_unwind(AssertUnwindSafe(|| handler(index, item))).is_err() {
            error!(worker = index, "work item handler panicked");
        }
    }
}
