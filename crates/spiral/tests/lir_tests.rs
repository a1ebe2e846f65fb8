//! Tests for the LIR evaluator: instructions, phi resolution, terminators,
//! the loop-step budget, and the async instruction set.

use spiral::tracer::NoopTracer;
use spiral::{ErrorCode, EvalLimits, EvalOptions, Evaluator, NoSink, Object, Program, SchedulerMode};

fn eval_lir(json: &str) -> Object {
    eval_lir_with(json, &EvalOptions::default())
}

fn eval_lir_with(json: &str, options: &EvalOptions) -> Object {
    let program = Program::from_json(json).unwrap();
    let mut sink = NoSink;
    let mut tracer = NoopTracer;
    Evaluator::new()
        .evaluate_lir(&program, &[], options, &mut sink, &mut tracer)
        .result
}

// === Straight-line blocks ===

#[test]
fn single_block_computes_and_returns() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg",
                "entry": "b0",
                "blocks": [{
                    "id": "b0",
                    "instructions": [
                        {"kind": "assign", "target": "x",
                         "expr": {"kind": "lit", "type": "int", "value": 20}},
                        {"kind": "op", "target": "y", "ns": "core", "name": "add",
                         "args": ["x", {"kind": "lit", "type": "int", "value": 22}]}
                    ],
                    "terminator": {"kind": "return", "value": "y"}
                }]
            }]
        }"#,
    );
    assert_eq!(result, Object::Int(42));
}

#[test]
fn return_without_value_is_void() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [{"id": "b0", "instructions": [], "terminator": {"kind": "return"}}]
            }]
        }"#,
    );
    assert_eq!(result, Object::Void);
}

// === Branching and phi ===

fn diamond_doc(flag: bool) -> String {
    // entry -> (then | else) -> merge, with a phi picking by predecessor.
    format!(
        r#"{{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{{
                "id": "cfg",
                "entry": "entry",
                "blocks": [
                    {{"id": "entry",
                      "instructions": [
                        {{"kind": "assign", "target": "flag",
                          "expr": {{"kind": "lit", "type": "bool", "value": {flag}}}}}],
                      "terminator": {{"kind": "cond", "value": "flag",
                                      "then": "yes", "else": "no"}}}},
                    {{"id": "yes",
                      "instructions": [
                        {{"kind": "assign", "target": "a",
                          "expr": {{"kind": "lit", "type": "int", "value": 1}}}}],
                      "terminator": {{"kind": "jump", "to": "merge"}}}},
                    {{"id": "no",
                      "instructions": [
                        {{"kind": "assign", "target": "b",
                          "expr": {{"kind": "lit", "type": "int", "value": 2}}}}],
                      "terminator": {{"kind": "jump", "to": "merge"}}}},
                    {{"id": "merge",
                      "instructions": [
                        {{"kind": "phi", "target": "out", "sources": [
                            {{"block": "yes", "id": "a"}},
                            {{"block": "no", "id": "b"}}
                        ]}}],
                      "terminator": {{"kind": "return", "value": "out"}}}}
                ]
            }}]
        }}"#
    )
}

#[test]
fn phi_picks_the_predecessor_source() {
    assert_eq!(eval_lir(&diamond_doc(true)), Object::Int(1));
    assert_eq!(eval_lir(&diamond_doc(false)), Object::Int(2));
}

#[test]
fn phi_without_matching_predecessor_takes_the_first_resolvable_source() {
    // The phi sits in the entry block: no predecessor exists, and the first
    // source id does not resolve. The policy picks the next non-error one.
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [{
                    "id": "b0",
                    "instructions": [
                        {"kind": "assign", "target": "known",
                         "expr": {"kind": "lit", "type": "int", "value": 9}},
                        {"kind": "phi", "target": "out", "sources": [
                            {"block": "ghost", "id": "missing"},
                            {"block": "ghost2", "id": "known"}
                        ]}
                    ],
                    "terminator": {"kind": "return", "value": "out"}
                }]
            }]
        }"#,
    );
    assert_eq!(result, Object::Int(9));
}

#[test]
fn cond_requires_a_boolean() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [
                    {"id": "b0", "instructions": [
                        {"kind": "assign", "target": "x",
                         "expr": {"kind": "lit", "type": "int", "value": 1}}],
                     "terminator": {"kind": "cond", "value": "x", "then": "b0", "else": "b0"}}
                ]
            }]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::TypeError));
}

// === Loops and the step budget ===

#[test]
fn counted_loop_terminates_with_cell_state() {
    // i = 0; loop: if i < 5 { i = i + 1 } else return i, via assignRef.
    let json = r#"{
        "version": "1.0",
        "result": "cfg",
        "nodes": [{
            "id": "cfg", "entry": "init",
            "blocks": [
                {"id": "init",
                 "instructions": [
                    {"kind": "assign", "target": "zero",
                     "expr": {"kind": "lit", "type": "int", "value": 0}},
                    {"kind": "assignRef", "target": "i", "value": "zero"}],
                 "terminator": {"kind": "jump", "to": "head"}},
                {"id": "head",
                 "instructions": [
                    {"kind": "op", "target": "go", "ns": "core", "name": "lt",
                     "args": ["i", {"kind": "lit", "type": "int", "value": 5}]}],
                 "terminator": {"kind": "cond", "value": "go", "then": "body", "else": "exit"}},
                {"id": "body",
                 "instructions": [
                    {"kind": "op", "target": "next", "ns": "core", "name": "add",
                     "args": ["i", {"kind": "lit", "type": "int", "value": 1}]},
                    {"kind": "assignRef", "target": "i", "value": "next"}],
                 "terminator": {"kind": "jump", "to": "head"}},
                {"id": "exit",
                 "instructions": [
                    {"kind": "assign", "target": "out", "expr": "i"}],
                 "terminator": {"kind": "return", "value": "out"}}
            ]
        }]
    }"#;
    let program = Program::from_json(json).unwrap();
    let mut sink = NoSink;
    let mut tracer = NoopTracer;
    let outcome = Evaluator::new().evaluate_lir(&program, &[], &EvalOptions::default(), &mut sink, &mut tracer);
    assert_eq!(outcome.result, Object::Int(5));
    assert_eq!(outcome.state.cells.get("i"), Some(&Object::Int(5)));
    assert!(outcome.state.steps_taken > 0, "block revisits consume steps");
}

#[test]
fn infinite_loop_exhausts_the_step_budget() {
    let json = r#"{
        "version": "1.0",
        "result": "cfg",
        "nodes": [{
            "id": "cfg", "entry": "spin",
            "blocks": [
                {"id": "spin", "instructions": [], "terminator": {"kind": "jump", "to": "spin"}}
            ]
        }]
    }"#;
    let options = EvalOptions {
        limits: EvalLimits::with_max_steps(100),
        ..EvalOptions::default()
    };
    let result = eval_lir_with(json, &options);
    assert_eq!(result.error_code(), Some(ErrorCode::NonTermination));
}

// === Effects and instruction-level errors ===

#[test]
fn instruction_errors_abort_the_block() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [{
                    "id": "b0",
                    "instructions": [
                        {"kind": "op", "target": "boom", "ns": "core", "name": "div",
                         "args": [{"kind": "lit", "type": "int", "value": 1},
                                  {"kind": "lit", "type": "int", "value": 0}]},
                        {"kind": "assign", "target": "never",
                         "expr": {"kind": "lit", "type": "int", "value": 1}}
                    ],
                    "terminator": {"kind": "return", "value": "never"}
                }]
            }]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::DivideByZero));
}

#[test]
fn missing_entry_block_is_a_validation_error() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "nope",
                "blocks": [{"id": "b0", "instructions": [], "terminator": {"kind": "return"}}]
            }]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
}

// === Async instructions ===

fn async_options() -> EvalOptions {
    EvalOptions::with_scheduler(SchedulerMode::Sequential)
}

#[test]
fn spawn_and_await_instructions() {
    let result = eval_lir_with(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [
                    {"id": "b0",
                     "instructions": [
                        {"kind": "spawn", "target": "fut", "task": "worker"},
                        {"kind": "await", "target": "out", "future": "fut"}],
                     "terminator": {"kind": "return", "value": "out"}},
                    {"id": "worker",
                     "instructions": [
                        {"kind": "op", "target": "v", "ns": "core", "name": "mul",
                         "args": [{"kind": "lit", "type": "int", "value": 6},
                                  {"kind": "lit", "type": "int", "value": 7}]}],
                     "terminator": {"kind": "return", "value": "v"}}
                ]
            }]
        }"#,
        &async_options(),
    );
    assert_eq!(result, Object::Int(42));
}

#[test]
fn fork_join_collects_branch_results() {
    let result = eval_lir_with(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [
                    {"id": "b0", "instructions": [],
                     "terminator": {"kind": "fork", "branches": ["one", "two"], "to": "meet"}},
                    {"id": "meet", "instructions": [],
                     "terminator": {"kind": "join", "target": "all", "to": "done"}},
                    {"id": "done", "instructions": [],
                     "terminator": {"kind": "return", "value": "all"}},
                    {"id": "one",
                     "instructions": [{"kind": "assign", "target": "v",
                        "expr": {"kind": "lit", "type": "int", "value": 1}}],
                     "terminator": {"kind": "return", "value": "v"}},
                    {"id": "two",
                     "instructions": [{"kind": "assign", "target": "v",
                        "expr": {"kind": "lit", "type": "int", "value": 2}}],
                     "terminator": {"kind": "return", "value": "v"}}
                ]
            }]
        }"#,
        &async_options(),
    );
    assert_eq!(result, Object::List(vec![Object::Int(1), Object::Int(2)]));
}

#[test]
fn try_variants_of_channel_ops_do_not_block() {
    let result = eval_lir_with(
        r#"{
            "version": "1.0",
            "capabilities": ["async"],
            "result": "cfg",
            "nodes": [
                {"id": "ch", "expr": {"kind": "channel", "channelType": "int",
                                      "bufferSize": {"kind": "lit", "type": "int", "value": 1}}},
                {"id": "cfg", "entry": "b0",
                 "blocks": [{
                    "id": "b0",
                    "instructions": [
                        {"kind": "channelOp", "op": "trySend", "channel": "ch",
                         "value": {"kind": "lit", "type": "int", "value": 1}, "target": "first"},
                        {"kind": "channelOp", "op": "trySend", "channel": "ch",
                         "value": {"kind": "lit", "type": "int", "value": 2}, "target": "second"},
                        {"kind": "channelOp", "op": "tryRecv", "channel": "ch", "target": "got"},
                        {"kind": "channelOp", "op": "tryRecv", "channel": "ch", "target": "empty"},
                        {"kind": "assign", "target": "out",
                         "expr": {"kind": "lit", "type": "list", "value": []}},
                        {"kind": "op", "target": "out", "ns": "list", "name": "concat",
                         "args": ["out", {"kind": "lit", "type": "list", "value": []}]}
                    ],
                    "terminator": {"kind": "return", "value": "got"}
                 }]}
            ]
        }"#,
        &async_options(),
    );
    assert_eq!(result, Object::Int(1));
}

#[test]
fn async_instructions_require_the_capability() {
    let result = eval_lir(
        r#"{
            "version": "1.0",
            "result": "cfg",
            "nodes": [{
                "id": "cfg", "entry": "b0",
                "blocks": [{
                    "id": "b0",
                    "instructions": [{"kind": "spawn", "target": "f", "task": "b0"}],
                    "terminator": {"kind": "return"}
                }]
            }]
        }"#,
    );
    assert_eq!(result.error_code(), Some(ErrorCode::ValidationError));
}
