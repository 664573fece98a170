use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use super::value::{HostValue, ScriptScope};

/// A deferred callback. The requested delay is kept for diagnostics only;
/// tasks run in scheduling order.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u32,
    pub callback: HostValue,
    pub args: Vec<HostValue>,
    pub delay_ms: f64,
    pub repeat: bool,
}

/// FIFO queue of timer tasks owned by one window.
///
/// Draining runs until the queue is empty, including tasks scheduled by the
/// tasks themselves. Interval tasks run once per drain and are queued again
/// for the next one.
pub struct TaskQueue {
    pending: RefCell<VecDeque<Task>>,
    next_id: Cell<u32>,
    running: Cell<Option<u32>>,
    running_cleared: Cell<bool>,
    generation: Cell<u64>,
    max_per_drain: usize,
}

impl TaskQueue {
    pub fn new(max_per_drain: usize) -> Self {
        Self {
            pending: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            running: Cell::new(None),
            running_cleared: Cell::new(false),
            generation: Cell::new(0),
            max_per_drain,
        }
    }

    pub fn schedule(&self, callback: HostValue, delay_ms: f64, args: Vec<HostValue>, repeat: bool) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1).max(1));
        tracing::trace!(target: "quickwindow::tasks", id, delay_ms, repeat, "scheduled task");
        self.pending.borrow_mut().push_back(Task {
            id,
            callback,
            args,
            delay_ms,
            repeat,
        });
        id
    }

    /// Cancel a pending task. Clearing an interval from inside its own
    /// callback stops it from being queued again.
    pub fn clear(&self, id: u32) {
        self.pending.borrow_mut().retain(|task| task.id != id);
        if self.running.get() == Some(id) {
            self.running_cleared.set(true);
        }
    }

    /// Drop every pending task. Intervals collected by a drain that is
    /// still running are not queued again either.
    pub fn clear_all(&self) {
        let dropped = std::mem::take(&mut *self.pending.borrow_mut());
        self.generation.set(self.generation.get().wrapping_add(1));
        if !dropped.is_empty() {
            tracing::debug!(target: "quickwindow::tasks", dropped = dropped.len(), "cleared task queue");
        }
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Run tasks until the queue is empty. Returns how many ran.
    pub fn drain(&self, scope: &dyn ScriptScope) -> usize {
        let mut ran = 0;
        let mut intervals = Vec::new();
        let mut generation = self.generation.get();

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            if ran >= self.max_per_drain {
                tracing::warn!(
                    target: "quickwindow::tasks",
                    limit = self.max_per_drain,
                    remaining = self.len() + 1,
                    "task drain limit reached; leaving the rest queued"
                );
                self.pending.borrow_mut().push_front(task);
                break;
            }

            self.running.set(Some(task.id));
            self.running_cleared.set(false);
            if let Err(err) = task.callback.invoke(scope, task.args.clone()) {
                tracing::error!(target: "quickwindow::tasks", id = task.id, error = %err, "task failed");
            }
            self.running.set(None);
            ran += 1;

            if self.generation.get() != generation {
                generation = self.generation.get();
                intervals.clear();
                continue;
            }
            if task.repeat && !self.running_cleared.get() {
                intervals.push(task);
            }
        }

        self.pending.borrow_mut().extend(intervals);
        if ran > 0 {
            tracing::debug!(target: "quickwindow::tasks", ran, "drained task queue");
        }
        ran
    }
}
