//! Task and future types for the concurrent evaluator.
//!
//! A spawned task is a thunk (an argument slot plus a captured environment)
//! recorded in the scheduler's table. Its future transitions pending →
//! ready|error exactly once; the table retains the final value until the
//! evaluation ends.

use serde::{Deserialize, Serialize};

use crate::{env::FrameId, errors::ErrorValue, expr::Arg, value::Value};

/// Unique identifier for a task.
///
/// Sequential integers allocated by the scheduler. Task 0 is always the main
/// evaluation, which never appears in the ready queue; spawned tasks are 1+.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u32);

impl TaskId {
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Returns true if this is the main task (task 0).
    #[inline]
    pub fn is_main(self) -> bool {
        self.0 == 0
    }
}

/// Lifecycle state of a task.
///
/// The transitions are monotonic: `Pending` → `Running` → `Ready` or
/// `Errored`, and cancellation moves any non-final state to `Errored`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum TaskState {
    /// Spawned but not yet started.
    Pending,
    /// Currently executing (possibly suspended below a reentrant drive).
    Running,
    /// Completed with a value.
    Ready(Value),
    /// Completed with an error.
    Errored(ErrorValue),
}

impl TaskState {
    /// True once the task has reached a final state.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Errored(_))
    }
}

/// What a task executes when it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum ThunkBody {
    /// An argument slot (node reference or inline expression).
    Expr(Arg),
    /// A block inside a block node's CFG, entered at `entry`.
    Block { node_id: String, entry: String },
}

/// The deferred computation a task runs, evaluated under a detached snapshot
/// of the spawner's environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskThunk {
    pub body: ThunkBody,
    pub env: FrameId,
}

/// One entry in the scheduler's task table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Task {
    pub state: TaskState,
    /// Taken (set to `None`) when the task starts running.
    pub thunk: Option<TaskThunk>,
    /// Tasks awaiting this one, in registration order.
    pub waiters: Vec<TaskId>,
}

impl Task {
    pub fn new(thunk: TaskThunk) -> Self {
        Self {
            state: TaskState::Pending,
            thunk: Some(thunk),
            waiters: Vec::new(),
        }
    }
}
