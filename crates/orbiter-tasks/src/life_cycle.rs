//! Task life-cycle notifications

use std::sync::{Arc, Mutex, PoisonError};

use crate::task::{Task, TaskId};

/// Exit code reported when a task ends without producing one
pub const CRASHED_EXIT_CODE: i32 = 1;

/// Receives per-task start/end notifications while a run executes.
///
/// Notifications arrive from concurrently running tasks. For every task,
/// `start_task` precedes `end_task`, and `end_task` is delivered on every
/// exit path once `start_task` has been called.
pub trait LifeCycle: Send + Sync {
    /// A task is about to start (or be replayed from cache)
    fn start_task(&self, task: &Task);

    /// A task finished with the given exit code
    fn end_task(&self, task: &Task, code: i32);

    /// A line of task output
    fn task_output(&self, _task: &Task, _line: &str, _is_stderr: bool) {}
}

/// Life cycle that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifeCycle;

impl LifeCycle for NoopLifeCycle {
    fn start_task(&self, _task: &Task) {}

    fn end_task(&self, _task: &Task, _code: i32) {}
}

/// Life cycle that logs to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLifeCycle;

impl LifeCycle for TracingLifeCycle {
    fn start_task(&self, task: &Task) {
        tracing::info!(task = %task.id, "task started");
    }

    fn end_task(&self, task: &Task, code: i32) {
        if code == 0 {
            tracing::info!(task = %task.id, "task finished");
        } else {
            tracing::error!(task = %task.id, code, "task failed");
        }
    }

    fn task_output(&self, task: &Task, line: &str, is_stderr: bool) {
        if is_stderr {
            tracing::debug!(task = %task.id, stream = "stderr", "{}", line);
        } else {
            tracing::trace!(task = %task.id, stream = "stdout", "{}", line);
        }
    }
}

/// A recorded life-cycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifeCycleEvent {
    Started(TaskId),
    Output { id: TaskId, line: String, is_stderr: bool },
    Ended(TaskId, i32),
}

/// Life cycle that records notifications for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingLifeCycle {
    events: Mutex<Vec<LifeCycleEvent>>,
}

impl CollectingLifeCycle {
    /// Get all collected events
    pub fn events(&self) -> Vec<LifeCycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of started tasks, in notification order
    pub fn started(&self) -> Vec<TaskId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LifeCycleEvent::Started(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Ids and exit codes of ended tasks, in notification order
    pub fn ended(&self) -> Vec<(TaskId, i32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                LifeCycleEvent::Ended(id, code) => Some((id, code)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: LifeCycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl LifeCycle for CollectingLifeCycle {
    fn start_task(&self, task: &Task) {
        self.push(LifeCycleEvent::Started(task.id.clone()));
    }

    fn end_task(&self, task: &Task, code: i32) {
        self.push(LifeCycleEvent::Ended(task.id.clone(), code));
    }

    fn task_output(&self, task: &Task, line: &str, is_stderr: bool) {
        self.push(LifeCycleEvent::Output {
            id: task.id.clone(),
            line: line.to_string(),
            is_stderr,
        });
    }
}

/// Forwards notifications to several life cycles in registration order
#[derive(Default)]
pub struct CompositeLifeCycle {
    life_cycles: Vec<Arc<dyn LifeCycle>>,
}

impl CompositeLifeCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, life_cycle: Arc<dyn LifeCycle>) {
        self.life_cycles.push(life_cycle);
    }

    pub fn with(mut self, life_cycle: Arc<dyn LifeCycle>) -> Self {
        self.register(life_cycle);
        self
    }

    pub fn len(&self) -> usize {
        self.life_cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.life_cycles.is_empty()
    }
}

impl LifeCycle for CompositeLifeCycle {
    fn start_task(&self, task: &Task) {
        for life_cycle in &self.life_cycles {
            life_cycle.start_task(task);
        }
    }

    fn end_task(&self, task: &Task, code: i32) {
        for life_cycle in &self.life_cycles {
            life_cycle.end_task(task, code);
        }
    }

    fn task_output(&self, task: &Task, line: &str, is_stderr: bool) {
        for life_cycle in &self.life_cycles {
            life_cycle.task_output(task, line, is_stderr);
        }
    }
}

/// Pairs `start_task` with exactly one `end_task`.
///
/// Dropping the scope without calling [`TaskScope::end`], as happens when a
/// task's future panics, reports [`CRASHED_EXIT_CODE`].
pub(crate) struct TaskScope {
    life_cycle: Arc<dyn LifeCycle>,
    task: Task,
    ended: bool,
}

impl TaskScope {
    pub(crate) fn start(life_cycle: Arc<dyn LifeCycle>, task: Task) -> Self {
        life_cycle.start_task(&task);
        Self {
            life_cycle,
            task,
            ended: false,
        }
    }

    pub(crate) fn end(mut self, code: i32) {
        self.ended = true;
        self.life_cycle.end_task(&self.task, code);
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if !self.ended {
            self.life_cycle.end_task(&self.task, CRASHED_EXIT_CODE);
        }
    }
}
