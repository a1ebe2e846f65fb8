//! Evaluation tracing infrastructure.
//!
//! A trait-based tracing system with hook points at key evaluation events:
//! node evaluation, task lifecycle, scheduler turns, channel traffic, loop-cap
//! warnings, and detector reports. The default [`NoopTracer`] does nothing;
//! [`StderrTracer`] writes a human-readable log; [`RecordingTracer`] captures
//! a full event list for asserting interleavings in tests.

/// Trace event emitted during evaluation.
///
/// Used by [`RecordingTracer`] to capture an execution trace for post-mortem
/// analysis or interleaving assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A top-level node began evaluating.
    Node { id: String },
    /// An effect was dispatched.
    Effect { name: String },
    /// A task was spawned.
    TaskSpawned { task: u32 },
    /// A task began running.
    TaskStarted { task: u32 },
    /// A task reached a final state.
    TaskCompleted { task: u32, ok: bool },
    /// The scheduler gave a task a turn.
    SchedulerTick { step: u32, task: u32 },
    /// A channel operation completed.
    Channel { op: &'static str, channel: u32 },
    /// An imperative loop hit the iteration safety cap and exited.
    LoopCap { kind: &'static str },
    /// A detector produced a report.
    Detector { kind: &'static str, summary: String },
}

/// Trait for evaluation tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code. Implementations only override the hooks they care
/// about.
pub trait EvalTracer: std::fmt::Debug {
    /// Called when a top-level node begins evaluating.
    #[inline]
    fn on_node(&mut self, _id: &str) {}

    /// Called when an effect is dispatched.
    #[inline]
    fn on_effect(&mut self, _name: &str) {}

    /// Called when a task is spawned.
    #[inline]
    fn on_task_spawned(&mut self, _task: u32) {}

    /// Called when a task's thunk begins running.
    #[inline]
    fn on_task_started(&mut self, _task: u32) {}

    /// Called when a task reaches a final state.
    ///
    /// # Arguments
    /// * `task` - The task id
    /// * `ok` - True for `Ready`, false for `Errored`
    #[inline]
    fn on_task_completed(&mut self, _task: u32, _ok: bool) {}

    /// Called once per scheduler turn with the global step counter.
    #[inline]
    fn on_scheduler_tick(&mut self, _step: u32, _task: u32) {}

    /// Called when a channel operation completes (not when it suspends).
    #[inline]
    fn on_channel(&mut self, _op: &'static str, _channel: u32) {}

    /// Called when a `while`/`for`/`iter` loop exits via the safety cap.
    ///
    /// The cap is a soft non-termination guard, not an error; this hook is
    /// the only place it is surfaced.
    #[inline]
    fn on_loop_cap(&mut self, _kind: &'static str) {}

    /// Called when a race or deadlock detector produces a report.
    #[inline]
    fn on_detector(&mut self, _kind: &'static str, _summary: &str) {}
}

/// A tracer that does nothing. The production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// A tracer that writes a human-readable log to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn on_node(&mut self, id: &str) {
        eprintln!("[spiral] node {id}");
    }

    fn on_task_spawned(&mut self, task: u32) {
        eprintln!("[spiral] spawn task {task}");
    }

    fn on_task_completed(&mut self, task: u32, ok: bool) {
        eprintln!("[spiral] task {task} {}", if ok { "ready" } else { "error" });
    }

    fn on_scheduler_tick(&mut self, step: u32, task: u32) {
        eprintln!("[spiral] tick {step} -> task {task}");
    }

    fn on_channel(&mut self, op: &'static str, channel: u32) {
        eprintln!("[spiral] channel {channel} {op}");
    }

    fn on_loop_cap(&mut self, kind: &'static str) {
        eprintln!("[spiral] warning: {kind} loop hit the iteration safety cap");
    }

    fn on_detector(&mut self, kind: &'static str, summary: &str) {
        eprintln!("[spiral] {kind}: {summary}");
    }
}

/// A tracer that records every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in emission order.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Consumes the tracer and returns the event list.
    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// The tasks given turns, in tick order. Convenient for fairness checks.
    #[must_use]
    pub fn tick_order(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::SchedulerTick { task, .. } => Some(*task),
                _ => None,
            })
            .collect()
    }
}

impl EvalTracer for RecordingTracer {
    fn on_node(&mut self, id: &str) {
        self.events.push(TraceEvent::Node { id: id.to_owned() });
    }

    fn on_effect(&mut self, name: &str) {
        self.events.push(TraceEvent::Effect { name: name.to_owned() });
    }

    fn on_task_spawned(&mut self, task: u32) {
        self.events.push(TraceEvent::TaskSpawned { task });
    }

    fn on_task_started(&mut self, task: u32) {
        self.events.push(TraceEvent::TaskStarted { task });
    }

    fn on_task_completed(&mut self, task: u32, ok: bool) {
        self.events.push(TraceEvent::TaskCompleted { task, ok });
    }

    fn on_scheduler_tick(&mut self, step: u32, task: u32) {
        self.events.push(TraceEvent::SchedulerTick { step, task });
    }

    fn on_channel(&mut self, op: &'static str, channel: u32) {
        self.events.push(TraceEvent::Channel { op, channel });
    }

    fn on_loop_cap(&mut self, kind: &'static str) {
        self.events.push(TraceEvent::LoopCap { kind });
    }

    fn on_detector(&mut self, kind: &'static str, summary: &str) {
        self.events.push(TraceEvent::Detector {
            kind,
            summary: summary.to_owned(),
        });
    }
}
