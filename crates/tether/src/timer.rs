//! Cancellable single-shot task slot.

use std::future::Future;

use tokio::task::JoinHandle;

/// Holds at most one pending local task.
///
/// Arming replaces (and aborts) whatever was pending. Dropping the slot
/// aborts the task.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    /// Start `task` on the current `LocalSet`, cancelling any pending one.
    pub(crate) fn arm<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::task::spawn_local(task));
    }

    /// Abort the pending task. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the pending task without aborting it.
    ///
    /// Called from inside the task itself once it has fired.
    pub(crate) fn release(&mut self) {
        self.handle = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
