//! Tests for the race and deadlock detectors, both driven directly and
//! observing real evaluations.

use std::time::Duration;

use spiral::tracer::{RecordingTracer, TraceEvent};
use spiral::{
    AccessKind, DeadlockDetector, DetectorConfig, EvalOptions, Evaluator, NoSink, Object, Program, RaceDetector,
    RaceKind, SchedulerMode,
};

// === Deadlock detection (lock-level API) ===

#[test]
fn classic_two_task_deadlock_cycle() {
    // Task A holds L1 and waits on L2; task B holds L2 and waits on L1.
    let mut detector = DeadlockDetector::new();
    assert!(detector.record_acquire_attempt(1, "L1"));
    assert!(detector.record_acquire_attempt(2, "L2"));
    assert!(!detector.record_acquire_attempt(1, "L2"));
    assert!(!detector.record_acquire_attempt(2, "L1"));

    let cycles = detector.detect();
    assert_eq!(cycles.len(), 1, "exactly one cycle");
    let cycle = &cycles[0];
    assert_eq!(cycle.tasks.len(), 2);
    assert!(cycle.tasks.contains(&1));
    assert!(cycle.tasks.contains(&2));
    // The lock sequence pairs each task with the lock it waits on.
    for (task, lock) in cycle.tasks.iter().zip(cycle.locks.iter()) {
        match task {
            1 => assert_eq!(lock, "L2"),
            2 => assert_eq!(lock, "L1"),
            other => panic!("unexpected task {other} in cycle"),
        }
    }
}

#[test]
fn three_task_cycle_is_found() {
    let mut detector = DeadlockDetector::new();
    detector.record_acquire_attempt(1, "A");
    detector.record_acquire_attempt(2, "B");
    detector.record_acquire_attempt(3, "C");
    detector.record_acquire_attempt(1, "B");
    detector.record_acquire_attempt(2, "C");
    detector.record_acquire_attempt(3, "A");

    let cycles = detector.detect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].tasks.len(), 3);
}

#[test]
fn no_cycle_without_circular_wait() {
    let mut detector = DeadlockDetector::new();
    detector.record_acquire_attempt(1, "A");
    detector.record_acquire_attempt(2, "B");
    // Task 2 waits on A, but task 1 waits on nothing.
    detector.record_acquire_attempt(2, "A");
    assert!(detector.detect().is_empty());
}

#[test]
fn reacquiring_a_held_lock_is_not_a_wait() {
    let mut detector = DeadlockDetector::new();
    assert!(detector.record_acquire_attempt(1, "A"));
    assert!(detector.record_acquire_attempt(1, "A"));
    assert!(detector.detect().is_empty());
}

#[test]
fn bounded_detection_times_out_cleanly_when_no_cycle_exists() {
    let detector = DeadlockDetector::new();
    let cycles = detector.detect_with_timeout(Duration::from_millis(120));
    assert!(cycles.is_empty());
}

// === Race detection (access-level API) ===

#[test]
fn report_carries_location_tasks_and_kind() {
    let mut detector = RaceDetector::new();
    detector.record_access(1, "counter", AccessKind::Write);
    detector.record_access(2, "counter", AccessKind::Read);
    let reports = detector.detect();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.location, "counter");
    assert_eq!(report.kind, RaceKind::WriteRead);
    assert_eq!((report.first_task, report.second_task), (1, 2));
}

#[test]
fn transitive_happens_before_suppresses_reports() {
    // 1 → 2 → 3 orders task 1's write before task 3's write.
    let mut detector = RaceDetector::new();
    detector.record_access(1, "x", AccessKind::Write);
    detector.record_sync_point(1, &[2]);
    detector.record_sync_point(2, &[3]);
    detector.record_access(3, "x", AccessKind::Write);
    assert!(detector.detect().is_empty());
}

// === Detectors observing evaluation ===

#[test]
fn auto_detect_reports_unsynchronized_cell_writes() {
    // Two spawned tasks write the same ref-cell with no ordering between
    // them; the auto-detector reports through the tracer.
    let json = r#"{
        "version": "1.0",
        "capabilities": ["async"],
        "result": "r",
        "nodes": [
            {"id": "w1", "expr": {"kind": "assign", "target": "shared",
                "value": {"kind": "lit", "type": "int", "value": 1}}},
            {"id": "w2", "expr": {"kind": "assign", "target": "shared",
                "value": {"kind": "lit", "type": "int", "value": 2}}},
            {"id": "f1", "expr": {"kind": "spawn", "task": "w1"}},
            {"id": "f2", "expr": {"kind": "spawn", "task": "w2"}},
            {"id": "r", "expr": {"kind": "do", "exprs": [
                {"kind": "await", "future": "f1"},
                {"kind": "await", "future": "f2"},
                {"kind": "refCell", "target": "shared"}
            ]}}
        ]
    }"#;
    let program = Program::from_json(json).unwrap();
    let options = EvalOptions {
        scheduler: SchedulerMode::BreadthFirst,
        detectors: DetectorConfig {
            race: true,
            auto_detect: true,
            ..DetectorConfig::default()
        },
        ..EvalOptions::default()
    };
    let mut sink = NoSink;
    let mut tracer = RecordingTracer::new();
    let result = Evaluator::new().run(&program, &[], &options, &mut sink, &mut tracer);
    assert_eq!(result, Object::Int(2));
    assert!(
        tracer
            .events()
            .iter()
            .any(|event| matches!(event, TraceEvent::Detector { kind: "race", .. })),
        "the auto-detector must report the unsynchronized writes"
    );
}

#[test]
fn awaited_writes_are_ordered_and_not_reported() {
    // The second writer is spawned only after the first one is awaited, so
    // a synchronization edge orders the two writes.
    let json = r#"{
        "version": "1.0",
        "capabilities": ["async"],
        "result": "r",
        "nodes": [
            {"id": "w1", "expr": {"kind": "assign", "target": "shared",
                "value": {"kind": "lit", "type": "int", "value": 1}}},
            {"id": "w2", "expr": {"kind": "assign", "target": "shared",
                "value": {"kind": "lit", "type": "int", "value": 2}}},
            {"id": "r", "expr": {"kind": "do", "exprs": [
                {"kind": "await", "future": {"kind": "spawn", "task": "w1"}},
                {"kind": "await", "future": {"kind": "spawn", "task": "w2"}},
                {"kind": "refCell", "target": "shared"}
            ]}}
        ]
    }"#;
    let program = Program::from_json(json).unwrap();
    let options = EvalOptions {
        scheduler: SchedulerMode::BreadthFirst,
        detectors: DetectorConfig {
            race: true,
            auto_detect: true,
            ..DetectorConfig::default()
        },
        ..EvalOptions::default()
    };
    let mut sink = NoSink;
    let mut tracer = RecordingTracer::new();
    let result = Evaluator::new().run(&program, &[], &options, &mut sink, &mut tracer);
    assert_eq!(result, Object::Int(2));
    assert!(
        !tracer
            .events()
            .iter()
            .any(|event| matches!(event, TraceEvent::Detector { kind: "race", .. })),
        "ordered writes must not be reported"
    );
}
