//! Tests for the PIR layer: spawn/await, par, select, race, timeouts, and
//! the deterministic scheduler modes.

use spiral::tracer::{NoopTracer, RecordingTracer, TraceEvent};
use spiral::{ErrorCode, EvalOptions, Evaluator, NoSink, Object, Program, SchedulerMode};

fn eval_with_mode(json: &str, mode: SchedulerMode) -> Object {
    let program = Program::from_json(json).unwrap();
    let mut sink = NoSink;
    let mut tracer = NoopTracer;
    Evaluator::new().run(&program, &[], &EvalOptions::with_scheduler(mode), &mut sink, &mut tracer)
}

fn eval_async(json: &str) -> Object {
    eval_with_mode(json, SchedulerMode::Sequential)
}

// === Capability gating ===

#[test]
fn async_forms_require_the_capability() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "result": "r",
            "nodes": [{"id": "r", "expr": {"kind": "spawn",
                "task": {"kind": "lit", "type": "int", "value": 1}}}]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
}

// === spawn + await ===

#[test]
fn spawn_then_await_with_fallback_returns_the_task_value() {
    // The task computing 42 completes before the 100ms timer.
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "task", "expr": {"kind": "lit", "type": "int", "value": 42}},
                {"id": "fut", "expr": {"kind": "spawn", "task": "task"}},
                {"id": "r", "expr": {"kind": "await", "future": "fut",
                    "timeout": {"kind": "lit", "type": "int", "value": 100},
                    "fallback": {"kind": "lit", "type": "int", "value": -1}}}
            ]
        }"#,
    );
    assert_eq!(result, Object::Int(42));
}

#[test]
fn spawn_snapshots_the_environment() {
    // The task sees x as it was at spawn time, not the later rebind.
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "r", "expr": {"kind": "let", "name": "x",
                    "value": {"kind": "lit", "type": "int", "value": 5},
                    "body": {"kind": "let", "name": "fut",
                        "value": {"kind": "spawn", "task": {"kind": "var", "name": "x"}},
                        "body": {"kind": "let", "name": "x",
                            "value": {"kind": "lit", "type": "int", "value": 99},
                            "body": {"kind": "await", "future": {"kind": "var", "name": "fut"}}}}}}
            ]
        }"#,
    );
    assert_eq!(result, Object::Int(5));
}

#[test]
fn await_non_future_is_a_type_error() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [{"id": "r", "expr": {"kind": "await",
                "future": {"kind": "lit", "type": "int", "value": 1}}}]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::TypeError));
}

#[test]
fn awaiting_an_errored_future_is_a_domain_error() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "task", "expr": {"kind": "call", "ns": "core", "name": "div", "args": [
                    {"kind": "lit", "type": "int", "value": 1},
                    {"kind": "lit", "type": "int", "value": 0}]}},
                {"id": "fut", "expr": {"kind": "spawn", "task": "task"}},
                {"id": "r", "expr": {"kind": "await", "future": "fut"}}
            ]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::DomainError));
}

// === Timeouts ===

#[test]
fn await_with_zero_timeout_on_pending_future_uses_the_fallback() {
    // Breadth-first: the spawned task is still pending when await runs.
    let result = eval_with_mode(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "task", "expr": {"kind": "lit", "type": "int", "value": 42}},
                {"id": "fut", "expr": {"kind": "spawn", "task": "task"}},
                {"id": "r", "expr": {"kind": "await", "future": "fut",
                    "timeout": {"kind": "lit", "type": "int", "value": 0},
                    "fallback": {"kind": "lit", "type": "int", "value": -1}}}
            ]
        }"#,
        SchedulerMode::BreadthFirst,
    );
    assert_eq!(result, Object::Int(-1));
}

#[test]
fn await_with_zero_timeout_and_no_fallback_is_a_timeout_error() {
    let result = eval_with_mode(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "task", "expr": {"kind": "lit", "type": "int", "value": 1}},
                {"id": "fut", "expr": {"kind": "spawn", "task": "task"}},
                {"id": "r", "expr": {"kind": "await", "future": "fut",
                    "timeout": {"kind": "lit", "type": "int", "value": 0}}}
            ]
        }"#,
        SchedulerMode::BreadthFirst,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::TimeoutError));
}

#[test]
fn negative_timeout_disables_the_timer() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "task", "expr": {"kind": "lit", "type": "int", "value": 7}},
                {"id": "fut", "expr": {"kind": "spawn", "task": "task"}},
                {"id": "r", "expr": {"kind": "await", "future": "fut",
                    "timeout": {"kind": "lit", "type": "int", "value": -1}}}
            ]
        }"#,
    );
    assert_eq!(result, Object::Int(7));
}

// === par ===

#[test]
fn par_preserves_branch_order_in_every_mode() {
    let json = r#"{
        "version": "1.0",
        "capabilities": ["async"],
        "result": "r",
        "nodes": [
            {"id": "r", "expr": {"kind": "par", "branches": [
                {"kind": "lit", "type": "int", "value": 1},
                {"kind": "lit", "type": "int", "value": 2},
                {"kind": "lit", "type": "int", "value": 3}
            ]}}
        ]
    }"#;
    let expected = Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)]);
    for mode in [
        SchedulerMode::Sequential,
        SchedulerMode::BreadthFirst,
        SchedulerMode::DepthFirst,
    ] {
        assert_eq!(eval_with_mode(json, mode), expected, "mode {mode}");
    }
}

// === select ===

#[test]
fn select_with_ready_futures_picks_the_first() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "t10", "expr": {"kind": "lit", "type": "int", "value": 10}},
                {"id": "t32", "expr": {"kind": "lit", "type": "int", "value": 32}},
                {"id": "f1", "expr": {"kind": "spawn", "task": "t10"}},
                {"id": "f2", "expr": {"kind": "spawn", "task": "t32"}},
                {"id": "r", "expr": {"kind": "select", "futures": ["f1", "f2"],
                    "timeout": {"kind": "lit", "type": "int", "value": 1},
                    "returnIndex": true}}
            ]
        }"#,
    );
    // Sequential mode: both are ready; the tie breaks by spawn order.
    assert_eq!(
        result,
        Object::SelectResult {
            index: 0,
            value: Box::new(Object::Int(10)),
        }
    );
}

#[test]
fn select_timeout_yields_index_minus_one_with_the_fallback() {
    let result = eval_with_mode(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "t1", "expr": {"kind": "lit", "type": "int", "value": 10}},
                {"id": "f1", "expr": {"kind": "spawn", "task": "t1"}},
                {"id": "r", "expr": {"kind": "select", "futures": ["f1"],
                    "timeout": {"kind": "lit", "type": "int", "value": 0},
                    "fallback": {"kind": "lit", "type": "int", "value": -7},
                    "returnIndex": true}}
            ]
        }"#,
        SchedulerMode::BreadthFirst,
    );
    assert_eq!(
        result,
        Object::SelectResult {
            index: -1,
            value: Box::new(Object::Int(-7)),
        }
    );
}

#[test]
fn select_timeout_without_fallback_is_a_select_timeout() {
    let result = eval_with_mode(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "t1", "expr": {"kind": "lit", "type": "int", "value": 10}},
                {"id": "f1", "expr": {"kind": "spawn", "task": "t1"}},
                {"id": "r", "expr": {"kind": "select", "futures": ["f1"],
                    "timeout": {"kind": "lit", "type": "int", "value": 0}}}
            ]
        }"#,
        SchedulerMode::BreadthFirst,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::SelectTimeout));
}

// === race ===

#[test]
fn race_returns_the_first_result() {
    let result = eval_async(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "r",
            "nodes": [
                {"id": "r", "expr": {"kind": "race", "tasks": [
                    {"kind": "lit", "type": "int", "value": 1},
                    {"kind": "lit", "type": "int", "value": 2}
                ]}}
            ]
        }"#,
    );
    assert_eq!(result, Object::Int(1));
}

// === Scheduler ordering ===

fn three_task_doc() -> &'static str {
    // Three spawned tasks awaited from the main computation in spawn order;
    // the document's value is the last await.
    r#"{
        "version": "1.0",
        "capabilities": ["async"],
        "result": "r",
        "nodes": [
            {"id": "t1", "expr": {"kind": "lit", "type": "int", "value": 1}},
            {"id": "t2", "expr": {"kind": "lit", "type": "int", "value": 2}},
            {"id": "t3", "expr": {"kind": "lit", "type": "int", "value": 3}},
            {"id": "f1", "expr": {"kind": "spawn", "task": "t1"}},
            {"id": "f2", "expr": {"kind": "spawn", "task": "t2"}},
            {"id": "f3", "expr": {"kind": "spawn", "task": "t3"}},
            {"id": "r", "expr": {"kind": "do", "exprs": [
                {"kind": "await", "future": "f1"},
                {"kind": "await", "future": "f2"},
                {"kind": "await", "future": "f3"}
            ]}}
        ]
    }"#
}

fn tick_order_for(mode: SchedulerMode) -> Vec<u32> {
    let program = Program::from_json(three_task_doc()).unwrap();
    let mut sink = NoSink;
    let mut tracer = RecordingTracer::new();
    let result = Evaluator::new().run(&program, &[], &EvalOptions::with_scheduler(mode), &mut sink, &mut tracer);
    assert_eq!(result, Object::Int(3));
    tracer.tick_order()
}

#[test]
fn breadth_first_round_robins_in_spawn_order() {
    assert_eq!(tick_order_for(SchedulerMode::BreadthFirst), vec![1, 2, 3]);
}

#[test]
fn depth_first_runs_newest_first() {
    assert_eq!(tick_order_for(SchedulerMode::DepthFirst), vec![3, 2, 1]);
}

#[test]
fn sequential_mode_completes_tasks_in_spawn_order() {
    let program = Program::from_json(three_task_doc()).unwrap();
    let mut sink = NoSink;
    let mut tracer = RecordingTracer::new();
    let result = Evaluator::new().run(
        &program,
        &[],
        &EvalOptions::with_scheduler(SchedulerMode::Sequential),
        &mut sink,
        &mut tracer,
    );
    assert_eq!(result, Object::Int(3));
    let completions: Vec<u32> = tracer
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::TaskCompleted { task, .. } => Some(*task),
            _ => None,
        })
        .collect();
    assert_eq!(completions, vec![1, 2, 3]);
}

#[test]
fn sequential_evaluation_is_reproducible() {
    let first = eval_async(three_task_doc());
    let second = eval_async(three_task_doc());
    assert_eq!(first, second);
}

#[test]
fn tasks_spawned_shows_up_in_state() {
    let program = Program::from_json(three_task_doc()).unwrap();
    let mut sink = NoSink;
    let mut tracer = NoopTracer;
    let outcome = Evaluator::new().evaluate_eir(&program, &[], &EvalOptions::default(), &mut sink, &mut tracer);
    assert_eq!(outcome.state.tasks_spawned, 3);
}
