//! Single-entry deferred-task slot. Simple and sufficient because the
//! demo device never schedules more than one task at a time; a
//! min-heap keyed by deadline would be the natural extension if that
//! ever changes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A callback scheduled to run once the EventLoop's clock passes a
/// deadline. `opaque` plays the role of the original's `void*` context;
/// in Rust it's simply captured by the boxed closure.
pub struct DeferredTask {
    pub deadline: Instant,
    callback: Box<dyn FnOnce() + Send>,
}

/// At most one outstanding task. Scheduling a new one while another is
/// pending replaces it, matching the original's single `task_fn` slot
/// (`pcie_net_add_task` simply overwrites `net->task_fn`). Backed by a
/// shared cell rather than a plain field so a [`TaskHandle`] can be
/// handed out to device logic (e.g. the DMA reference device) that
/// needs to schedule its own completion callback without otherwise
/// reaching into the `Endpoint`.
pub struct TaskSlot {
    inner: Arc<Mutex<Option<DeferredTask>>>,
}

impl Default for TaskSlot {
    fn default() -> Self {
        TaskSlot::new()
    }
}

/// A cloneable, `Send` handle onto the same slot a [`TaskSlot`] polls.
/// Everything still runs on the single EventLoop thread; the
/// `Mutex` exists only so the slot can be shared, not for real
/// cross-thread contention.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<Mutex<Option<DeferredTask>>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        TaskSlot {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn schedule(&mut self, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        self.handle().schedule(delay, callback);
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Time remaining until the pending task's deadline, `None` if no
    /// task is scheduled, `Some(Duration::ZERO)` if the deadline has
    /// already passed.
    pub fn time_until_due(&self) -> Option<Duration> {
        self.inner.lock().unwrap().as_ref().map(|t| {
            let now = Instant::now();
            if t.deadline > now {
                t.deadline - now
            } else {
                Duration::ZERO
            }
        })
    }

    /// `true` once the pending task's deadline has elapsed.
    pub fn is_due(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |t| Instant::now() >= t.deadline)
    }

    /// Consume the slot and run its callback. The slot is cleared
    /// *before* the callback runs so a task may reschedule itself from
    /// inside its own body.
    pub fn fire(&mut self) {
        let task = self.inner.lock().unwrap().take();
        if let Some(task) = task {
            (task.callback)();
        }
    }
}

impl TaskHandle {
    pub fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        *self.inner.lock().unwrap() = Some(DeferredTask {
            deadline: Instant::now() + delay,
            callback,
        });
    }
}
