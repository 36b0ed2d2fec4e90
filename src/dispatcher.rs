//! Dispatcher — the scheduling capability an [`Observable`](crate::observable::Observable)
//! delegates to.
//!
//! Dispatchers are deliberately minimal: `dispatch(task)` either runs `task`
//! inline or hands it off, and never blocks the caller beyond that choice.
//! Three concrete shapes are provided, matching the three named in the
//! spec's design notes — synchronous, thread-per-task, and ring-buffer —
//! plus a fourth for hosts that already run a Tokio runtime.

use crossbeam_channel::{bounded, Sender};
use std::fmt;
use std::sync::Mutex;
use std::thread::JoinHandle;

/// A unit of scheduled work: invoke a registered consumer with one event.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling capability. Implementations may run `task` synchronously on
/// the caller's thread or hand it to another thread; either way,
/// `dispatch` itself never blocks waiting for `task` to finish unless the
/// dispatcher is synchronous.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Schedule `task` for execution.
    fn dispatch(&self, task: Task);

    /// Whether this dispatcher executes inline on the caller's thread.
    /// [`Observable`](crate::observable::Observable) implementations may
    /// use this to decide whether a child's bus needs its own dispatcher
    /// or can safely share synchronous fan-out (see spec §4.7).
    fn is_synchronous(&self) -> bool {
        false
    }
}

/// Runs every task inline, on the thread that called `dispatch`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousDispatcher;

impl Dispatcher for SynchronousDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }

    fn is_synchronous(&self) -> bool {
        true
    }
}

/// Spawns a new OS thread per scheduled task ("thread-per-task").
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDispatcher;

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, task: Task) {
        std::thread::spawn(task);
    }
}

/// A bounded queue drained by one dedicated worker thread — the
/// systems-language analog of a ring-buffer dispatcher (single consumer,
/// in-order execution, bounded backlog).
pub struct RingBufferDispatcher {
    sender: Sender<Task>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RingBufferDispatcher {
    /// Create a ring-buffer dispatcher with the given queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded::<Task>(capacity);
        let worker = std::thread::spawn(move || {
            while let Ok(task) = receiver.recv() {
                task();
            }
        });
        Self {
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl fmt::Debug for RingBufferDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBufferDispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher for RingBufferDispatcher {
    fn dispatch(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::warn!("RingBufferDispatcher worker gone; task dropped");
        }
    }
}

impl Drop for RingBufferDispatcher {
    fn drop(&mut self) {
        // Dropping `sender` here would require moving it out of `&self`;
        // instead the channel closes naturally once all senders (held by
        // any cloned dispatcher handles) are dropped. We just join if we
        // still own the only handle.
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                if !handle.is_finished() {
                    // Worker may still be blocked in `recv`; nothing more
                    // to do here since `sender` lives on `self` and drops
                    // after this runs. Detach rather than risk deadlock.
                    drop(handle);
                }
            }
        }
    }
}

/// Schedules tasks onto an existing Tokio runtime via
/// [`tokio::runtime::Handle`], for hosts that already run one.
#[derive(Clone)]
pub struct TokioDispatcher {
    handle: tokio::runtime::Handle,
}

impl TokioDispatcher {
    /// Build a dispatcher from the currently running Tokio runtime.
    ///
    /// Returns `Err` if called outside a Tokio runtime context.
    pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self {
            handle: tokio::runtime::Handle::try_current()?,
        })
    }

    /// Build a dispatcher from an explicit runtime handle.
    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl fmt::Debug for TokioDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioDispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn synchronous_dispatcher_runs_inline() {
        let dispatcher = SynchronousDispatcher;
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        dispatcher.dispatch(Box::new(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(dispatcher.is_synchronous());
    }

    #[test]
    fn thread_dispatcher_runs_off_thread() {
        let dispatcher = ThreadDispatcher;
        let (tx, rx) = std::sync::mpsc::channel();
        dispatcher.dispatch(Box::new(move || {
            tx.send(()).unwrap();
        }));
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(!dispatcher.is_synchronous());
    }

    #[test]
    fn ring_buffer_dispatcher_executes_in_order() {
        let dispatcher = RingBufferDispatcher::new(16);
        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            dispatcher.dispatch(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);
        let received: Vec<i32> = rx.iter().collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn tokio_dispatcher_runs_on_runtime() {
        let dispatcher = TokioDispatcher::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.dispatch(Box::new(move || {
            let _ = tx.send(());
        }));
        rx.await.unwrap();
    }
}
