//! The PIR extensions: par/spawn/await/channel/send/recv/select/race, plus
//! the scheduler drive loops.
//!
//! Scheduling is single-threaded cooperative with reentrant drives: when the
//! running computation blocks (pending future, empty or full channel), it
//! pops ready tasks and runs them until the blocking condition clears or the
//! scheduler is quiescent. Quiescence with a timer pending resolves the
//! timer immediately (no runnable task could ever beat it), which keeps
//! golden tests free of wall-clock sleeps.

use std::time::{Duration, Instant};

use crate::{
    channel::SendAttempt,
    env::FrameId,
    errors::{ErrorCode, RunError, RunResult},
    eval::EvalContext,
    expr::{Arg, Expr},
    heap::{HeapData, SelectOutcome},
    sched::SchedulerMode,
    task::{TaskId, TaskState, TaskThunk, ThunkBody},
    types::Type,
    value::Value,
};

/// Why a wait loop returned.
enum WaitOutcome {
    /// The awaited task completed with a value.
    Done(Value),
    /// The awaited task completed with an error.
    Failed(crate::errors::ErrorValue),
    /// The deadline passed between scheduler turns.
    TimedOut,
    /// No ready task remains and the awaited task is still pending.
    Quiescent,
}

impl EvalContext<'_> {
    /// Dispatches the PIR expression kinds.
    pub(super) fn eval_concurrent(&mut self, expr: &Expr, frame: FrameId) -> RunResult<Value> {
        match expr {
            Expr::Par { branches } => self.eval_par(branches, frame),
            Expr::Spawn { task } => {
                let id = self.spawn_task(ThunkBody::Expr(task.clone()), frame)?;
                Ok(Value::Future(id))
            }
            Expr::Await {
                future,
                timeout,
                fallback,
                return_index,
            } => self.eval_await(future, timeout.as_ref(), fallback.as_ref(), *return_index, frame),
            Expr::Channel {
                channel_type,
                buffer_size,
            } => self.eval_channel(channel_type.as_ref(), buffer_size.as_ref(), frame),
            Expr::Send { channel, value } => self.eval_send(channel, value, frame),
            Expr::Recv { channel } => self.eval_recv(channel, frame),
            Expr::Select {
                futures,
                timeout,
                fallback,
                return_index,
            } => self.eval_select(futures, timeout.as_ref(), fallback.as_ref(), *return_index, frame),
            Expr::Race { tasks } => self.eval_race(tasks, frame),
            other => Err(RunError::validation(format!(
                "expression kind routed to the concurrent evaluator is not concurrent: {other:?}"
            ))),
        }
    }

    /// Spawns a task over a snapshot of the caller's environment.
    ///
    /// The snapshot is a flattened clone of the name→value map, so later
    /// rebinds in the caller do not leak into the task. In sequential mode
    /// the task runs to completion before `spawn` returns.
    pub(crate) fn spawn_task(&mut self, body: ThunkBody, frame: FrameId) -> RunResult<TaskId> {
        let snapshot = self.frames.flatten(frame);
        let env = self.frames.detached(snapshot);
        let id = self.sched.spawn(TaskThunk { body, env });
        self.tracer.on_task_spawned(id.raw());
        self.record_sync(self.current_task, &[id]);
        if self.sched.mode() == SchedulerMode::Sequential {
            self.run_task(id)?;
        }
        Ok(id)
    }

    /// Runs one task's thunk to completion, recording its final state.
    ///
    /// Catchable errors become the task's error state; fatal errors abort
    /// the whole evaluation.
    fn run_task(&mut self, id: TaskId) -> RunResult<()> {
        let Some(thunk) = self.sched.start(id) else {
            return Ok(());
        };
        self.tracer.on_task_started(id.raw());
        let saved = self.current_task;
        self.current_task = id;
        let outcome = match &thunk.body {
            ThunkBody::Expr(arg) => self.eval_arg(arg, thunk.env),
            ThunkBody::Block { node_id, entry } => {
                let node_id = node_id.clone();
                let entry = entry.clone();
                crate::lir::eval::run_block_node(self, &node_id, &entry, thunk.env)
            }
        };
        self.current_task = saved;
        match outcome {
            Ok(value) => {
                self.sched.complete(id, Ok(value));
                self.tracer.on_task_completed(id.raw(), true);
                Ok(())
            }
            Err(RunError::Raise(err)) => {
                self.sched.complete(id, Err(*err));
                self.tracer.on_task_completed(id.raw(), false);
                Ok(())
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// Gives one ready task a turn. Returns false when the queue is empty.
    pub(crate) fn drive_one(&mut self) -> RunResult<bool> {
        loop {
            let Some(id) = self.sched.next_ready() else {
                self.sched.reset_steps();
                return Ok(false);
            };
            // Stale entries (already started in sequential mode) are skipped.
            if !matches!(self.sched.state(id), TaskState::Pending) {
                continue;
            }
            let step = self.sched.tick();
            self.tracer.on_scheduler_tick(step, id.raw());
            self.run_task(id)?;
            self.auto_detect();
            self.sched.reset_steps();
            return Ok(true);
        }
    }

    /// The `checkGlobalSteps` suspension hook for long-running computations.
    ///
    /// In breadth-first mode this yields one scheduler turn and advances the
    /// global step counter; in the other modes it only ticks the counter.
    pub(crate) fn check_global_steps(&mut self) -> RunResult<()> {
        if self.sched.mode() == SchedulerMode::BreadthFirst {
            self.drive_one()?;
        } else {
            self.sched.tick();
        }
        Ok(())
    }

    /// Loop-boundary suspension point used by the EIR loops when a
    /// concurrent run has ready tasks.
    pub(crate) fn loop_suspension_hook(&mut self) -> RunResult<()> {
        if self.async_allowed && self.sched.mode() != SchedulerMode::Sequential && self.sched.has_ready() {
            self.check_global_steps()?;
        }
        Ok(())
    }

    /// `par(branches)`: all branches, result list in branch order.
    fn eval_par(&mut self, branches: &[Arg], frame: FrameId) -> RunResult<Value> {
        if self.sched.mode() == SchedulerMode::Sequential {
            let mut results = Vec::with_capacity(branches.len());
            for branch in branches {
                results.push(self.eval_arg(branch, frame)?);
            }
            return self.heap.alloc_list(results);
        }
        let ids: Vec<TaskId> = branches
            .iter()
            .map(|branch| self.spawn_task(ThunkBody::Expr(branch.clone()), frame))
            .collect::<RunResult<_>>()?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            self.sched.add_waiter(id, self.current_task);
            match self.wait_for_task(id, None)? {
                WaitOutcome::Done(value) => {
                    self.record_sync(self.current_task, &[id]);
                    results.push(value);
                }
                WaitOutcome::Failed(err) => return Err(RunError::Raise(Box::new(err))),
                WaitOutcome::TimedOut | WaitOutcome::Quiescent => {
                    return Err(RunError::domain("par branch blocked with no runnable tasks"));
                }
            }
        }
        self.heap.alloc_list(results)
    }

    /// Shared wait loop: drive ready tasks until `id` completes, the
    /// deadline passes, or the scheduler is quiescent.
    pub(crate) fn wait_for_task(&mut self, id: TaskId, deadline: Option<Instant>) -> RunResult<WaitOutcome> {
        loop {
            match self.sched.state(id) {
                TaskState::Ready(value) => return Ok(WaitOutcome::Done(value.clone())),
                TaskState::Errored(err) => return Ok(WaitOutcome::Failed(err.clone())),
                TaskState::Pending | TaskState::Running => {}
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok(WaitOutcome::TimedOut);
            }
            if !self.drive_one()? {
                return Ok(WaitOutcome::Quiescent);
            }
        }
    }

    /// Awaits one forked task for a `join` terminator.
    pub(crate) fn join_forked(&mut self, id: TaskId) -> RunResult<Value> {
        match self.wait_for_task(id, None)? {
            WaitOutcome::Done(value) => {
                self.record_sync(self.current_task, &[id]);
                Ok(value)
            }
            WaitOutcome::Failed(err) => Err(RunError::Raise(Box::new(err))),
            WaitOutcome::TimedOut | WaitOutcome::Quiescent => {
                Err(RunError::domain("join on pending fork with no runnable tasks"))
            }
        }
    }

    /// Evaluates an optional timeout argument. Negative values disable the
    /// timer.
    fn eval_timeout(&mut self, timeout: Option<&Arg>, frame: FrameId) -> RunResult<Option<i64>> {
        match timeout {
            None => Ok(None),
            Some(arg) => {
                let value = self.eval_arg(arg, frame)?;
                let ms = value.expect_int(&self.heap, "timeout")?;
                Ok(if ms < 0 { None } else { Some(ms) })
            }
        }
    }

    /// Evaluates a timeout fallback; evaluation errors inside the fallback
    /// are reported as `DomainError`.
    fn eval_fallback(&mut self, fallback: &Arg, frame: FrameId) -> RunResult<Value> {
        match self.eval_arg(fallback, frame) {
            Ok(value) => Ok(value),
            Err(RunError::Raise(err)) => Err(RunError::raise(
                ErrorCode::DomainError,
                format!("timeout fallback failed: {err}"),
            )),
            Err(fatal) => Err(fatal),
        }
    }

    fn make_select_result(&mut self, index: i64, value: Value) -> RunResult<Value> {
        let id = self.heap.allocate(HeapData::SelectResult(SelectOutcome { index, value }))?;
        Ok(Value::Ref(id))
    }

    /// `await(future, timeout?, fallback?, returnIndex?)`.
    pub(crate) fn eval_await(
        &mut self,
        future: &Arg,
        timeout: Option<&Arg>,
        fallback: Option<&Arg>,
        return_index: bool,
        frame: FrameId,
    ) -> RunResult<Value> {
        let value = self.eval_arg(future, frame)?;
        let Value::Future(id) = value else {
            return Err(RunError::type_error(format!(
                "await expects future, got {}",
                value.type_tag(&self.heap)
            )));
        };
        let timeout_ms = self.eval_timeout(timeout, frame)?;

        // Fast paths: already settled.
        match self.sched.state(id) {
            TaskState::Ready(ready) => {
                let ready = ready.clone();
                self.record_sync(self.current_task, &[id]);
                return if return_index {
                    self.make_select_result(0, ready)
                } else {
                    Ok(ready)
                };
            }
            TaskState::Errored(err) => {
                let err = err.clone();
                return Err(RunError::raise(
                    ErrorCode::DomainError,
                    format!("future completed with error: {err}"),
                ));
            }
            TaskState::Pending | TaskState::Running => {}
        }

        if timeout_ms == Some(0) {
            return self.await_timeout_path(id, fallback, return_index, frame);
        }

        self.sched.add_waiter(id, self.current_task);
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms as u64));
        let outcome = self.wait_for_task(id, deadline)?;
        match outcome {
            WaitOutcome::Done(ready) => {
                self.record_sync(self.current_task, &[id]);
                if return_index {
                    self.make_select_result(0, ready)
                } else {
                    Ok(ready)
                }
            }
            WaitOutcome::Failed(err) => {
                self.sched.remove_waiter(id, self.current_task);
                Err(RunError::raise(
                    ErrorCode::DomainError,
                    format!("future completed with error: {err}"),
                ))
            }
            WaitOutcome::TimedOut => self.await_timeout_path(id, fallback, return_index, frame),
            WaitOutcome::Quiescent => {
                if timeout_ms.is_some() {
                    // Only the timer can fire now; resolve it.
                    self.await_timeout_path(id, fallback, return_index, frame)
                } else {
                    self.sched.remove_waiter(id, self.current_task);
                    Err(RunError::domain("await on pending future with no runnable tasks"))
                }
            }
        }
    }

    /// The timeout branch of `await`: the waiter is removed, the underlying
    /// task keeps its state, and the fallback (when present) wins.
    fn await_timeout_path(
        &mut self,
        id: TaskId,
        fallback: Option<&Arg>,
        return_index: bool,
        frame: FrameId,
    ) -> RunResult<Value> {
        self.sched.remove_waiter(id, self.current_task);
        match fallback {
            Some(fallback) => {
                let value = self.eval_fallback(fallback, frame)?;
                if return_index {
                    self.make_select_result(1, value)
                } else {
                    Ok(value)
                }
            }
            None => {
                if return_index {
                    let err = crate::errors::ErrorValue::new(ErrorCode::TimeoutError, "await timed out");
                    self.make_select_result(1, Value::Error(Box::new(err)))
                } else {
                    Err(RunError::raise(ErrorCode::TimeoutError, "await timed out"))
                }
            }
        }
    }

    /// `select(futures, timeout?, fallback?, returnIndex?)`: the first
    /// future to produce wins; ties break by list position (spawn order).
    fn eval_select(
        &mut self,
        futures: &[Arg],
        timeout: Option<&Arg>,
        fallback: Option<&Arg>,
        return_index: bool,
        frame: FrameId,
    ) -> RunResult<Value> {
        let mut ids = Vec::with_capacity(futures.len());
        for future in futures {
            let value = self.eval_arg(future, frame)?;
            match value {
                Value::Future(id) => ids.push(id),
                other => {
                    return Err(RunError::type_error(format!(
                        "select expects futures, got {}",
                        other.type_tag(&self.heap)
                    )));
                }
            }
        }
        if ids.is_empty() {
            return Err(RunError::domain("select over an empty future list"));
        }
        let timeout_ms = self.eval_timeout(timeout, frame)?;
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms as u64));

        loop {
            for (position, id) in ids.iter().enumerate() {
                match self.sched.state(*id) {
                    TaskState::Ready(value) => {
                        let value = value.clone();
                        let id = *id;
                        self.record_sync(self.current_task, &[id]);
                        return if return_index {
                            self.make_select_result(position as i64, value)
                        } else {
                            Ok(value)
                        };
                    }
                    TaskState::Errored(err) => {
                        let err = err.clone();
                        return Err(RunError::raise(
                            ErrorCode::DomainError,
                            format!("future completed with error: {err}"),
                        ));
                    }
                    TaskState::Pending | TaskState::Running => {}
                }
            }
            let timer_expired = timeout_ms == Some(0)
                || deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if timer_expired {
                return self.select_timeout_path(fallback, return_index, frame);
            }
            if !self.drive_one()? {
                if timeout_ms.is_some() {
                    return self.select_timeout_path(fallback, return_index, frame);
                }
                return Err(RunError::domain("select on pending futures with no runnable tasks"));
            }
        }
    }

    /// The timeout branch of `select`: index -1 marks the timeout win.
    fn select_timeout_path(&mut self, fallback: Option<&Arg>, return_index: bool, frame: FrameId) -> RunResult<Value> {
        match fallback {
            Some(fallback) => {
                let value = self.eval_fallback(fallback, frame)?;
                if return_index {
                    self.make_select_result(-1, value)
                } else {
                    Ok(value)
                }
            }
            None => {
                if return_index {
                    let err = crate::errors::ErrorValue::new(ErrorCode::SelectTimeout, "select timed out");
                    self.make_select_result(-1, Value::Error(Box::new(err)))
                } else {
                    Err(RunError::raise(ErrorCode::SelectTimeout, "select timed out"))
                }
            }
        }
    }

    /// `race(tasks)`: spawn every task, return the first result.
    fn eval_race(&mut self, tasks: &[Arg], frame: FrameId) -> RunResult<Value> {
        if tasks.is_empty() {
            return Err(RunError::domain("race over an empty task list"));
        }
        let ids: Vec<TaskId> = tasks
            .iter()
            .map(|task| self.spawn_task(ThunkBody::Expr(task.clone()), frame))
            .collect::<RunResult<_>>()?;
        loop {
            for id in &ids {
                match self.sched.state(*id) {
                    TaskState::Ready(value) => {
                        let value = value.clone();
                        self.record_sync(self.current_task, &[*id]);
                        return Ok(value);
                    }
                    TaskState::Errored(err) => {
                        let err = err.clone();
                        return Err(RunError::Raise(Box::new(err)));
                    }
                    TaskState::Pending | TaskState::Running => {}
                }
            }
            if !self.drive_one()? {
                return Err(RunError::domain("race on pending tasks with no runnable tasks"));
            }
        }
    }

    /// `channel(channelType, bufferSize?)`: buffer size defaults to 0
    /// (synchronous rendezvous).
    fn eval_channel(
        &mut self,
        channel_type: Option<&Type>,
        buffer_size: Option<&Arg>,
        frame: FrameId,
    ) -> RunResult<Value> {
        let capacity = match buffer_size {
            None => 0usize,
            Some(arg) => {
                let value = self.eval_arg(arg, frame)?;
                let size = value.expect_int(&self.heap, "channel buffer size")?;
                usize::try_from(size).map_err(|_| RunError::domain("channel buffer size must be non-negative"))?
            }
        };
        let id = self.channels.create(capacity, channel_type.cloned());
        Ok(Value::Channel(id))
    }

    /// `send(channel, value)`: suspends when the buffer is full.
    pub(crate) fn eval_send(&mut self, channel: &Arg, value: &Arg, frame: FrameId) -> RunResult<Value> {
        let handle = self.eval_arg(channel, frame)?;
        let Value::Channel(id) = handle else {
            return Err(RunError::type_error(format!(
                "send expects channel, got {}",
                handle.type_tag(&self.heap)
            )));
        };
        let value = self.eval_arg(value, frame)?;
        self.check_channel_element(id, &value)?;
        if self.channels.get(id).is_closed() {
            return Err(RunError::domain("send on closed channel"));
        }

        let (attempt, returned) = self.channels.get_mut(id).try_send(value);
        if attempt == SendAttempt::Accepted {
            self.tracer.on_channel("send", id.raw());
            return Ok(Value::Void);
        }

        // Buffer full: park and drive until a receiver drains our entry.
        let sender = self.current_task;
        let parked = returned.expect("blocked send returns its value");
        self.channels.get_mut(id).park_sender(sender, parked);
        while self.channels.get(id).sender_parked(sender) {
            if !self.drive_one()? {
                return Err(RunError::domain("send on full channel with no runnable tasks"));
            }
        }
        self.tracer.on_channel("send", id.raw());
        Ok(Value::Void)
    }

    /// `recv(channel)`: suspends when the buffer is empty.
    pub(crate) fn eval_recv(&mut self, channel: &Arg, frame: FrameId) -> RunResult<Value> {
        let handle = self.eval_arg(channel, frame)?;
        let Value::Channel(id) = handle else {
            return Err(RunError::type_error(format!(
                "recv expects channel, got {}",
                handle.type_tag(&self.heap)
            )));
        };
        if let Some(value) = self.channels.get_mut(id).try_recv() {
            self.tracer.on_channel("recv", id.raw());
            return Ok(value);
        }

        let receiver = self.current_task;
        self.channels.get_mut(id).park_receiver(receiver);
        loop {
            if let Some(value) = self.channels.get_mut(id).take_handoff(receiver) {
                self.tracer.on_channel("recv", id.raw());
                return Ok(value);
            }
            if !self.drive_one()? {
                self.channels.get_mut(id).unpark_receiver(receiver);
                return Err(RunError::domain("recv on empty channel with no runnable tasks"));
            }
        }
    }

    /// Checks a sent value against the channel's declared element type.
    fn check_channel_element(&self, id: crate::channel::ChannelId, value: &Value) -> RunResult<()> {
        if let Some(declared) = self.channels.get(id).element_type() {
            let expected = declared.tag();
            let actual = value.type_tag(&self.heap);
            if expected != actual {
                return Err(RunError::type_error(format!(
                    "channel carries {expected}, got {actual}"
                )));
            }
        }
        Ok(())
    }
}
