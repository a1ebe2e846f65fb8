//! The deterministic task scheduler.
//!
//! This module owns the task table and ready queue; the drive loops that
//! actually run task thunks live in the concurrent evaluator, which borrows
//! the whole evaluation context. Scheduling is single-threaded cooperative:
//! one task runs at a time, and interleavings occur only at suspension
//! points.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    errors::ErrorValue,
    task::{Task, TaskId, TaskState, TaskThunk},
    value::Value,
};

/// Scheduling discipline for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerMode {
    /// Tasks run to completion in spawn order; spawns drain before the host
    /// step resumes. Reproducible traces for golden-output testing.
    #[default]
    Sequential,
    /// Round-robin of ready tasks in spawn order; the global step counter
    /// ticks each turn.
    BreadthFirst,
    /// Newest-first LIFO among ready tasks.
    DepthFirst,
}

/// Task table, ready queue, and global step counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Scheduler {
    tasks: Vec<Task>,
    ready: VecDeque<TaskId>,
    mode: SchedulerMode,
    global_step: u32,
    cancelled: bool,
}

impl Scheduler {
    /// Creates the scheduler with the main task (task 0) already running.
    pub fn new(mode: SchedulerMode) -> Self {
        let main = Task {
            state: TaskState::Running,
            thunk: None,
            waiters: Vec::new(),
        };
        Self {
            tasks: vec![main],
            ready: VecDeque::new(),
            mode,
            global_step: 0,
            cancelled: false,
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn global_step(&self) -> u32 {
        self.global_step
    }

    /// Records a new task and enqueues it according to the mode.
    ///
    /// In sequential mode the caller is expected to run the task to
    /// completion immediately; it is still enqueued so a drive loop that
    /// finds it can start it.
    pub fn spawn(&mut self, thunk: TaskThunk) -> TaskId {
        let id = TaskId::new(u32::try_from(self.tasks.len()).expect("task table overflow"));
        self.tasks.push(Task::new(thunk));
        match self.mode {
            SchedulerMode::DepthFirst => self.ready.push_front(id),
            SchedulerMode::Sequential | SchedulerMode::BreadthFirst => self.ready.push_back(id),
        }
        id
    }

    pub fn state(&self, id: TaskId) -> &TaskState {
        &self.tasks[id.raw() as usize].state
    }

    /// Takes a pending task's thunk and marks it running.
    ///
    /// Returns `None` when the task has already started or finished.
    pub fn start(&mut self, id: TaskId) -> Option<TaskThunk> {
        let task = &mut self.tasks[id.raw() as usize];
        if !matches!(task.state, TaskState::Pending) {
            return None;
        }
        task.state = TaskState::Running;
        task.thunk.take()
    }

    /// Moves a task to its final state; returns its registered waiters.
    ///
    /// The transition is monotonic: completing an already-done task is a
    /// no-op returning no waiters (a timed-out waiter may have abandoned the
    /// task, whose result is then discarded).
    pub fn complete(&mut self, id: TaskId, outcome: Result<Value, ErrorValue>) -> Vec<TaskId> {
        let task = &mut self.tasks[id.raw() as usize];
        if task.state.is_done() {
            return Vec::new();
        }
        task.state = match outcome {
            Ok(value) => TaskState::Ready(value),
            Err(err) => TaskState::Errored(err),
        };
        std::mem::take(&mut task.waiters)
    }

    /// Registers `waiter` to be notified when `id` completes.
    pub fn add_waiter(&mut self, id: TaskId, waiter: TaskId) {
        let task = &mut self.tasks[id.raw() as usize];
        if !task.state.is_done() && !task.waiters.contains(&waiter) {
            task.waiters.push(waiter);
        }
    }

    /// Removes `waiter` from a task's waiter list (timeout path).
    pub fn remove_waiter(&mut self, id: TaskId, waiter: TaskId) {
        self.tasks[id.raw() as usize].waiters.retain(|w| *w != waiter);
    }

    /// Pops the next ready task per the mode's discipline.
    ///
    /// Both queues pop from the front: breadth-first pushed at the back
    /// (FIFO), depth-first pushed at the front (LIFO).
    pub fn next_ready(&mut self) -> Option<TaskId> {
        let id = self.ready.pop_front()?;
        Some(id)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Ticks the global step counter for one scheduler turn.
    pub fn tick(&mut self) -> u32 {
        self.global_step += 1;
        self.global_step
    }

    /// Resets the step counter; called whenever the ready queue empties.
    pub fn reset_steps(&mut self) {
        if self.ready.is_empty() {
            self.global_step = 0;
        }
    }

    /// Cancels the scheduler: every non-final task completes with an error
    /// and the ready queue is drained. Pending awaits observe the error.
    pub fn cancel(&mut self, reason: &str) {
        self.cancelled = true;
        self.ready.clear();
        for task in &mut self.tasks {
            if !task.state.is_done() {
                task.state = TaskState::Errored(ErrorValue::domain(format!("task cancelled: {reason}")));
                task.waiters.clear();
            }
        }
    }
}
