/// Clock and cancellable repeating tasks
///
/// The background worker never calls `setInterval` directly: every repeating
/// task goes through a `TaskScheduler`, so tests can swap in `ManualScheduler`
/// and step virtual time instead of waiting on a wall clock.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

pub trait TaskScheduler {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> f64;

    /// Run `task` every `interval_ms` until the returned handle is cancelled
    fn every(&self, interval_ms: u32, task: Box<dyn FnMut()>) -> TaskHandle;
}

/// Handle to a repeating task. Cancelling or dropping it stops the task.
pub struct TaskHandle {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl TaskHandle {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        TaskHandle {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Deterministic scheduler driven by `advance`
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<RefCell<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now_ms: u64,
    next_id: u64,
    tasks: BTreeMap<u64, ManualTask>,
}

struct ManualTask {
    interval_ms: u64,
    next_due_ms: u64,
    // None while the task is running
    task: Option<Box<dyn FnMut()>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now_ms: u64) -> Self {
        let scheduler = Self::default();
        scheduler.inner.borrow_mut().now_ms = now_ms;
        scheduler
    }

    pub fn active_tasks(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Move virtual time forward, firing every task that falls due in order
    pub fn advance(&self, ms: u64) {
        let target = self.inner.borrow().now_ms + ms;

        loop {
            let due = {
                let state = self.inner.borrow();
                state
                    .tasks
                    .iter()
                    .filter(|(_, t)| t.task.is_some() && t.next_due_ms <= target)
                    .min_by_key(|(id, t)| (t.next_due_ms, **id))
                    .map(|(id, _)| *id)
            };
            let Some(id) = due else { break };

            let mut task = {
                let mut state = self.inner.borrow_mut();
                let Some(entry) = state.tasks.get_mut(&id) else {
                    continue;
                };
                let fired_at = entry.next_due_ms;
                entry.next_due_ms += entry.interval_ms;
                let task = entry.task.take();
                state.now_ms = fired_at;
                match task {
                    Some(task) => task,
                    None => continue,
                }
            };

            task();

            // The task may have cancelled itself while it ran
            if let Some(entry) = self.inner.borrow_mut().tasks.get_mut(&id) {
                entry.task = Some(task);
            }
        }

        self.inner.borrow_mut().now_ms = target;
    }
}

impl TaskScheduler for ManualScheduler {
    fn now_ms(&self) -> f64 {
        self.inner.borrow().now_ms as f64
    }

    fn every(&self, interval_ms: u32, task: Box<dyn FnMut()>) -> TaskHandle {
        let interval_ms = u64::from(interval_ms.max(1));
        let id = {
            let mut state = self.inner.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            let next_due_ms = state.now_ms + interval_ms;
            state.tasks.insert(
                id,
                ManualTask {
                    interval_ms,
                    next_due_ms,
                    task: Some(task),
                },
            );
            id
        };

        let weak: Weak<RefCell<ManualState>> = Rc::downgrade(&self.inner);
        TaskHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.borrow_mut().tasks.remove(&id);
                drop(removed);
            }
        })
    }
}
