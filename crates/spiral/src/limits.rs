//! Evaluation budgets.
//!
//! Every run carries an [`EvalLimits`] describing its step, loop, allocation,
//! and depth budgets. The limits are deliberately coarse: they bound runaway
//! documents, they are not a profiling facility.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorCode, RunError, RunResult};

/// Default per-document CFG/loop step budget.
pub const DEFAULT_MAX_STEPS: u32 = 10_000;

/// Default iteration safety cap for `while`/`for`/`iter` loops.
///
/// Hitting the cap is a soft non-termination guard: the loop exits normally
/// and a tracer warning is emitted, it is not an error.
pub const DEFAULT_LOOP_CAP: u32 = 10_000;

/// Default maximum `$ref` resolution depth across documents.
pub const DEFAULT_MAX_REF_DEPTH: u32 = 10;

/// Default maximum closure-application recursion depth.
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 512;

/// Resource budgets for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalLimits {
    /// CFG step budget; exceeding it yields a `NonTermination` error.
    pub max_steps: u32,
    /// Soft iteration cap for imperative loops.
    pub loop_cap: u32,
    /// Maximum `$ref` chain depth during reference resolution.
    pub max_ref_depth: u32,
    /// Maximum closure-application depth.
    pub max_recursion_depth: u32,
    /// Optional cap on heap allocations, `None` for unlimited.
    pub max_allocations: Option<usize>,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            loop_cap: DEFAULT_LOOP_CAP,
            max_ref_depth: DEFAULT_MAX_REF_DEPTH,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_allocations: None,
        }
    }
}

impl EvalLimits {
    /// Limits with a custom CFG step budget and defaults elsewhere.
    #[must_use]
    pub fn with_max_steps(max_steps: u32) -> Self {
        Self {
            max_steps,
            ..Self::default()
        }
    }
}

/// Mutable step accounting for one evaluation.
///
/// Shared by the LIR block loop and the scheduler: each block re-entry and
/// each scheduler turn ticks the counter. Exhaustion is a hard error
/// (`NonTermination`), unlike the soft loop cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCounter {
    taken: u32,
    budget: u32,
}

impl StepCounter {
    /// Creates a counter with the given budget.
    #[must_use]
    pub fn new(budget: u32) -> Self {
        Self { taken: 0, budget }
    }

    /// Number of steps consumed so far.
    #[must_use]
    pub fn taken(&self) -> u32 {
        self.taken
    }

    /// Consumes one step, failing when the budget is exhausted.
    pub fn tick(&mut self) -> RunResult<()> {
        self.taken += 1;
        if self.taken > self.budget {
            return Err(RunError::raise(
                ErrorCode::NonTermination,
                format!("step budget exhausted after {} steps", self.budget),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counter_exhausts_at_budget() {
        let mut steps = StepCounter::new(3);
        assert!(steps.tick().is_ok());
        assert!(steps.tick().is_ok());
        assert!(steps.tick().is_ok());
        let err = steps.tick().unwrap_err();
        assert_eq!(err.error_value().code, ErrorCode::NonTermination);
    }

    #[test]
    fn defaults_match_documented_budgets() {
        let limits = EvalLimits::default();
        assert_eq!(limits.max_steps, 10_000);
        assert_eq!(limits.loop_cap, 10_000);
        assert_eq!(limits.max_ref_depth, 10);
    }
}
