use std::sync::Arc;
use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::thread;
use std::time::Duration;

use vellum_store::Storage;

use crate::datastore::Core;
use crate::executor::Executor;

/// Intervals below this are clamped up; compacting more often than every
/// five seconds turns the journal into a rewrite loop.
pub(crate) const MIN_AUTOCOMPACTION_INTERVAL: Duration = Duration::from_millis(5000);

/// Periodically enqueues a compaction through the executor, so it
/// serializes with every other operation.
///
/// The timer thread sleeps on a stop channel: a receive timeout is the
/// tick, and a hangup ends it — the same shutdown idiom the executor uses.
/// Dropping the handle stops the timer and joins the thread.
pub(crate) struct CompactionTimer {
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CompactionTimer {
    pub(crate) fn spawn<S: Storage>(executor: Arc<Executor<Core<S>>>, interval: Duration) -> Self {
        let interval = interval.max(MIN_AUTOCOMPACTION_INTERVAL);
        let (stop_tx, stop_rx) = channel::<()>();
        let thread = thread::spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                executor.push(
                    Box::new(|core: &mut Core<S>| {
                        let _ = core.compact();
                    }),
                    false,
                );
            }
        });
        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

impl Drop for CompactionTimer {
    fn drop(&mut self) {
        // Hanging up the stop channel wakes the timer out of its sleep.
        drop(self.stop_tx.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
