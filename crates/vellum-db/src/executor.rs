use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::DbError;

pub(crate) type Job<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// A single-consumer FIFO task queue with a pre-ready buffer.
///
/// The worker thread owns the state `T`; jobs are closures run against it
/// one at a time, in push order. The queue starts **buffering**: jobs
/// accumulate until [`process_buffer`](Self::process_buffer) flips it to
/// **ready** and drains them in order. A forced push bypasses the buffer, so
/// load-time work can run ahead of operations queued before the store was
/// ready.
///
/// A job that panics is caught so the next job still runs; its caller sees
/// the broken reply channel instead.
pub(crate) struct Executor<T> {
    queue: Mutex<QueueState<T>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

struct QueueState<T> {
    ready: bool,
    buffer: Vec<Job<T>>,
    tx: Option<Sender<Job<T>>>,
}

impl<T: Send + 'static> Executor<T> {
    pub fn new(mut state: T) -> Self {
        let (tx, rx) = channel::<Job<T>>();
        let worker = thread::spawn(move || {
            for job in rx {
                let _ = catch_unwind(AssertUnwindSafe(|| job(&mut state)));
            }
        });
        Self {
            queue: Mutex::new(QueueState {
                ready: false,
                buffer: Vec::new(),
                tx: Some(tx),
            }),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a job. While buffering, non-forced jobs wait in the buffer;
    /// forced jobs go straight to the worker.
    pub fn push(&self, job: Job<T>, force: bool) {
        let mut queue = self.lock_queue();
        if queue.ready || force {
            if let Some(tx) = &queue.tx {
                let _ = tx.send(job);
            }
        } else {
            queue.buffer.push(job);
        }
    }

    /// Flip to ready and hand the buffered jobs to the worker in push order.
    pub fn process_buffer(&self) {
        let mut queue = self.lock_queue();
        queue.ready = true;
        let drained: Vec<Job<T>> = queue.buffer.drain(..).collect();
        if let Some(tx) = &queue.tx {
            for job in drained {
                let _ = tx.send(job);
            }
        }
    }

    /// Enqueue a job and block until it reports its result.
    pub fn submit<R, F>(&self, force: bool, f: F) -> Result<R, DbError>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        let (tx, rx) = channel();
        self.push(
            Box::new(move |state| {
                let _ = tx.send(f(state));
            }),
            force,
        );
        rx.recv()
            .map_err(|_| DbError::Internal("queued operation did not complete".to_string()))
    }
}

impl<T> Executor<T> {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Drop for Executor<T> {
    fn drop(&mut self) {
        // Hang up the channel so the worker drains and exits, then join it.
        self.lock_queue().tx = None;
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
