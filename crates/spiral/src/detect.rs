//! Race and deadlock detectors.
//!
//! Both detectors observe concurrent execution without influencing it. The
//! race detector performs happens-before analysis over recorded memory
//! accesses using vector clocks; the deadlock detector maintains lock
//! ownership and wait state and searches the induced wait-for graph for
//! cycles.

use std::time::{Duration, Instant};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Detector configuration carried in evaluation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Record ref-cell accesses and report races.
    pub race: bool,
    /// Track waits and report deadlock cycles.
    pub deadlock: bool,
    /// Run the enabled detectors periodically (warn-only, via the tracer)
    /// instead of only on demand.
    pub auto_detect: bool,
    /// Budget for timeout-bounded deadlock detection.
    pub deadlock_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            race: false,
            deadlock: false,
            auto_detect: false,
            deadlock_timeout_ms: 1_000,
        }
    }
}

/// Kind of memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
}

/// Race flavor: which sides wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceKind {
    WriteWrite,
    WriteRead,
    ReadWrite,
}

/// One reported race: two unordered accesses to the same location from
/// different tasks, at least one a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceReport {
    pub location: String,
    pub first_task: u32,
    pub second_task: u32,
    pub kind: RaceKind,
}

/// Vector clock: per-task logical time.
type Clock = AHashMap<u32, u64>;

/// Returns true when `a` happens before `b` under vector-clock order.
fn happens_before(a: &Clock, a_task: u32, b: &Clock) -> bool {
    let a_time = a.get(&a_task).copied().unwrap_or(0);
    b.get(&a_task).copied().unwrap_or(0) >= a_time
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Access {
    task: u32,
    location: String,
    kind: AccessKind,
    clock: Clock,
}

/// Happens-before race detector over recorded memory accesses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaceDetector {
    accesses: Vec<Access>,
    clocks: AHashMap<u32, Clock>,
}

impl RaceDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clock_mut(&mut self, task: u32) -> &mut Clock {
        self.clocks.entry(task).or_default()
    }

    /// Records one access to `location` by `task`.
    pub fn record_access(&mut self, task: u32, location: &str, kind: AccessKind) {
        let clock = self.clock_mut(task);
        *clock.entry(task).or_insert(0) += 1;
        let snapshot = clock.clone();
        self.accesses.push(Access {
            task,
            location: location.to_owned(),
            kind,
            clock: snapshot,
        });
    }

    /// Records a synchronization point between `task` and `others`.
    ///
    /// The clocks merge both ways (barrier semantics): everything either side
    /// did so far happens before everything either side does afterwards.
    pub fn record_sync_point(&mut self, task: u32, others: &[u32]) {
        let mut merged = self.clocks.get(&task).cloned().unwrap_or_default();
        for other in others {
            if let Some(clock) = self.clocks.get(other) {
                for (&t, &time) in clock {
                    let entry = merged.entry(t).or_insert(0);
                    *entry = (*entry).max(time);
                }
            }
        }
        for participant in std::iter::once(task).chain(others.iter().copied()) {
            self.clocks.insert(participant, merged.clone());
        }
    }

    /// Compares every access pair per location and reports the unordered
    /// conflicting ones.
    #[must_use]
    pub fn detect(&self) -> Vec<RaceReport> {
        let mut reports = Vec::new();
        for (i, a) in self.accesses.iter().enumerate() {
            for b in &self.accesses[i + 1..] {
                if a.location != b.location || a.task == b.task {
                    continue;
                }
                if matches!((a.kind, b.kind), (AccessKind::Read, AccessKind::Read)) {
                    continue;
                }
                if happens_before(&a.clock, a.task, &b.clock) || happens_before(&b.clock, b.task, &a.clock) {
                    continue;
                }
                let kind = match (a.kind, b.kind) {
                    (AccessKind::Write, AccessKind::Write) => RaceKind::WriteWrite,
                    (AccessKind::Write, AccessKind::Read) => RaceKind::WriteRead,
                    (AccessKind::Read, AccessKind::Write) => RaceKind::ReadWrite,
                    (AccessKind::Read, AccessKind::Read) => unreachable!("read pairs are skipped"),
                };
                reports.push(RaceReport {
                    location: a.location.clone(),
                    first_task: a.task,
                    second_task: b.task,
                    kind,
                });
            }
        }
        reports
    }
}

/// One detected circular wait.
///
/// `tasks` lists the cycle participants in order; `locks[i]` is the lock
/// `tasks[i]` is waiting on, held by `tasks[(i + 1) % n]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockCycle {
    pub tasks: Vec<u32>,
    pub locks: Vec<String>,
}

/// Wait-for-graph deadlock detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadlockDetector {
    /// lock name → holding task.
    holders: AHashMap<String, u32>,
    /// task → the lock it is blocked on.
    waiting: AHashMap<u32, String>,
}

impl DeadlockDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `task` wants `lock`. If the lock is free (or already held
    /// by `task`) the acquisition succeeds immediately; otherwise the task is
    /// marked waiting.
    ///
    /// Returns true when the lock was acquired.
    pub fn record_acquire_attempt(&mut self, task: u32, lock: &str) -> bool {
        match self.holders.get(lock) {
            Some(&holder) if holder != task => {
                self.waiting.insert(task, lock.to_owned());
                false
            }
            _ => {
                self.holders.insert(lock.to_owned(), task);
                self.waiting.remove(&task);
                true
            }
        }
    }

    /// Records that `task` now holds `lock` (a formerly blocked acquisition
    /// went through).
    pub fn record_acquired(&mut self, task: u32, lock: &str) {
        self.holders.insert(lock.to_owned(), task);
        self.waiting.remove(&task);
    }

    /// Records that `task` released `lock`.
    pub fn record_release(&mut self, task: u32, lock: &str) {
        if self.holders.get(lock) == Some(&task) {
            self.holders.remove(lock);
        }
    }

    /// Builds the wait-for graph and returns every cycle found.
    ///
    /// DFS with a recursion stack; each back-edge yields a cycle. Cycles are
    /// deduplicated by their task membership regardless of rotation.
    #[must_use]
    pub fn detect(&self) -> Vec<DeadlockCycle> {
        // waiter → holder edges.
        let mut edges: AHashMap<u32, u32> = AHashMap::new();
        for (&waiter, lock) in &self.waiting {
            if let Some(&holder) = self.holders.get(lock) {
                edges.insert(waiter, holder);
            }
        }

        let mut cycles = Vec::new();
        let mut seen_cycles: Vec<Vec<u32>> = Vec::new();
        let mut visited: AHashMap<u32, bool> = AHashMap::new();

        for &start in edges.keys() {
            if visited.get(&start).copied().unwrap_or(false) {
                continue;
            }
            let mut stack = Vec::new();
            let mut current = start;
            loop {
                if let Some(position) = stack.iter().position(|&t| t == current) {
                    // Back-edge: the tail of the stack is a cycle.
                    let cycle: Vec<u32> = stack[position..].to_vec();
                    let mut membership = cycle.clone();
                    membership.sort_unstable();
                    if !seen_cycles.contains(&membership) {
                        seen_cycles.push(membership);
                        let locks = cycle
                            .iter()
                            .map(|task| self.waiting.get(task).cloned().unwrap_or_default())
                            .collect();
                        cycles.push(DeadlockCycle { tasks: cycle, locks });
                    }
                    break;
                }
                visited.insert(current, true);
                stack.push(current);
                match edges.get(&current) {
                    Some(&next) => current = next,
                    None => break,
                }
            }
        }
        cycles
    }

    /// Polls for a cycle every 100 ms until one appears or the timeout
    /// elapses. Returns immediately when a cycle is already present.
    #[must_use]
    pub fn detect_with_timeout(&self, timeout: Duration) -> Vec<DeadlockCycle> {
        let deadline = Instant::now() + timeout;
        loop {
            let cycles = self.detect();
            if !cycles.is_empty() || Instant::now() >= deadline {
                return cycles;
            }
            std::thread::sleep(Duration::from_millis(100).min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsynchronized_write_write_is_reported() {
        let mut detector = RaceDetector::new();
        detector.record_access(1, "sum", AccessKind::Write);
        detector.record_access(2, "sum", AccessKind::Write);
        let reports = detector.detect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, RaceKind::WriteWrite);
        assert_eq!(reports[0].location, "sum");
    }

    #[test]
    fn sync_points_order_accesses() {
        let mut detector = RaceDetector::new();
        detector.record_access(1, "sum", AccessKind::Write);
        detector.record_sync_point(1, &[2]);
        detector.record_access(2, "sum", AccessKind::Write);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn read_read_pairs_are_not_races() {
        let mut detector = RaceDetector::new();
        detector.record_access(1, "x", AccessKind::Read);
        detector.record_access(2, "x", AccessKind::Read);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn distinct_locations_do_not_conflict() {
        let mut detector = RaceDetector::new();
        detector.record_access(1, "x", AccessKind::Write);
        detector.record_access(2, "y", AccessKind::Write);
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn two_task_cycle_is_detected_once() {
        let mut detector = DeadlockDetector::new();
        assert!(detector.record_acquire_attempt(1, "L1"));
        assert!(detector.record_acquire_attempt(2, "L2"));
        assert!(!detector.record_acquire_attempt(1, "L2"));
        assert!(!detector.record_acquire_attempt(2, "L1"));

        let cycles = detector.detect();
        assert_eq!(cycles.len(), 1);
        let cycle = &cycles[0];
        assert_eq!(cycle.tasks.len(), 2);
        assert!(cycle.tasks.contains(&1) && cycle.tasks.contains(&2));
        // Each task's entry names the lock it waits on.
        for (task, lock) in cycle.tasks.iter().zip(cycle.locks.iter()) {
            match task {
                1 => assert_eq!(lock, "L2"),
                2 => assert_eq!(lock, "L1"),
                other => panic!("unexpected task {other}"),
            }
        }
    }

    #[test]
    fn release_breaks_the_cycle() {
        let mut detector = DeadlockDetector::new();
        detector.record_acquire_attempt(1, "L1");
        detector.record_acquire_attempt(2, "L2");
        detector.record_acquire_attempt(1, "L2");
        detector.record_acquire_attempt(2, "L1");
        detector.record_release(2, "L2");
        detector.record_acquired(1, "L2");
        assert!(detector.detect().is_empty());
    }

    #[test]
    fn timeout_detection_returns_existing_cycle_immediately() {
        let mut detector = DeadlockDetector::new();
        detector.record_acquire_attempt(1, "A");
        detector.record_acquire_attempt(2, "B");
        detector.record_acquire_attempt(1, "B");
        detector.record_acquire_attempt(2, "A");
        let started = Instant::now();
        let cycles = detector.detect_with_timeout(Duration::from_secs(5));
        assert_eq!(cycles.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
