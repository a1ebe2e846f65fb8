//! Public interface for evaluating documents.
//!
//! An [`Evaluator`] owns the operator and effect registries (and optionally
//! a reference resolver) and evaluates validated [`Program`]s against them.
//! The five entry points mirror the engine's external contract:
//! `evaluate`/`evaluate_async` return a value, the EIR and LIR variants also
//! return a state snapshot. One engine serves all of them; the document's
//! node shapes and capabilities decide which layers run.
//!
//! # Example
//! ```
//! use spiral::{Evaluator, Object, Program};
//!
//! let program = Program::from_json(
//!     r#"{
//!         "version": "1.0",
//!         "result": "c",
//!         "nodes": [
//!             {"id": "a", "expr": {"kind": "lit", "type": "int", "value": 5}},
//!             {"id": "b", "expr": {"kind": "lit", "type": "int", "value": 10}},
//!             {"id": "c", "expr": {"kind": "call", "ns": "core", "name": "add",
//!                                  "args": ["a", "b"]}}
//!         ]
//!     }"#,
//! )
//! .unwrap();
//! let result = Evaluator::new().evaluate(&program, &[]);
//! assert_eq!(result, Object::Int(15));
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    detect::DetectorConfig,
    document::Program,
    effects::{EffectRegistry, EffectSink, StdSink},
    errors::RunResult,
    eval::EvalContext,
    heap::HeapStats,
    limits::EvalLimits,
    object::Object,
    ops::OperatorRegistry,
    resolve::RefResolver,
    sched::SchedulerMode,
    tracer::{EvalTracer, NoopTracer},
    value::Value,
};

/// Options for one evaluation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EvalOptions {
    /// Step, loop, allocation, and depth budgets.
    pub limits: EvalLimits,
    /// Scheduling discipline for concurrent documents.
    pub scheduler: SchedulerMode,
    /// Race/deadlock detector configuration.
    pub detectors: DetectorConfig,
}

impl EvalOptions {
    /// Options with a custom scheduler mode and defaults elsewhere.
    #[must_use]
    pub fn with_scheduler(scheduler: SchedulerMode) -> Self {
        Self {
            scheduler,
            ..Self::default()
        }
    }
}

/// Snapshot of mutable evaluation state, returned by the EIR and LIR entry
/// points alongside the result.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalState {
    /// Named ref-cells and their final contents.
    pub cells: IndexMap<String, Object>,
    /// CFG/scheduler steps consumed.
    pub steps_taken: u32,
    /// Number of tasks spawned over the run (main task excluded).
    pub tasks_spawned: usize,
    /// Final heap statistics.
    pub heap: HeapStats,
}

/// Result-plus-state outcome of an EIR or LIR evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub result: Object,
    pub state: EvalState,
}

/// Evaluates documents against owned registries.
#[derive(Debug)]
pub struct Evaluator {
    ops: OperatorRegistry,
    effects: EffectRegistry,
    resolver: Option<RefResolver>,
}

impl Default for Evaluator {
    /// Same as [`Evaluator::new`]: the standard registries, no resolver.
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// An evaluator with the standard operator and effect registries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: OperatorRegistry::standard(),
            effects: EffectRegistry::standard(),
            resolver: None,
        }
    }

    /// Replaces the operator registry.
    #[must_use]
    pub fn with_operators(mut self, ops: OperatorRegistry) -> Self {
        self.ops = ops;
        self
    }

    /// Replaces the effect registry.
    #[must_use]
    pub fn with_effects(mut self, effects: EffectRegistry) -> Self {
        self.effects = effects;
        self
    }

    /// Installs a reference resolver for cross-document `$ref`s.
    #[must_use]
    pub fn with_resolver(mut self, resolver: RefResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Mutable access to the operator registry, for host registrations.
    pub fn operators_mut(&mut self) -> &mut OperatorRegistry {
        &mut self.ops
    }

    /// Mutable access to the effect registry, for host registrations.
    pub fn effects_mut(&mut self) -> &mut EffectRegistry {
        &mut self.effects
    }

    /// Evaluates a pure or imperative document with default options,
    /// printing effects to stdout. Uncaught errors become error objects.
    pub fn evaluate(&self, program: &Program, inputs: &[(String, Object)]) -> Object {
        let mut sink = StdSink;
        let mut tracer = NoopTracer;
        self.run(program, inputs, &EvalOptions::default(), &mut sink, &mut tracer)
    }

    /// Evaluates a document that declares the `async` capability.
    ///
    /// The engine is single-threaded either way; this entry point exists for
    /// parity with the external contract and defaults to the sequential
    /// scheduler for reproducible traces.
    pub fn evaluate_async(&self, program: &Program, inputs: &[(String, Object)]) -> Object {
        self.evaluate(program, inputs)
    }

    /// Full-control evaluation: explicit options, sink, and tracer.
    pub fn run(
        &self,
        program: &Program,
        inputs: &[(String, Object)],
        options: &EvalOptions,
        sink: &mut impl EffectSink,
        tracer: &mut impl EvalTracer,
    ) -> Object {
        self.execute(program, inputs, options, sink, tracer).result
    }

    /// Evaluates an EIR document, returning the result and the final
    /// mutable state (ref-cells, step counts).
    pub fn evaluate_eir(
        &self,
        program: &Program,
        inputs: &[(String, Object)],
        options: &EvalOptions,
        sink: &mut impl EffectSink,
        tracer: &mut impl EvalTracer,
    ) -> EvalOutcome {
        self.execute(program, inputs, options, sink, tracer)
    }

    /// Evaluates an LIR (CFG-form) document, returning the result and state.
    pub fn evaluate_lir(
        &self,
        program: &Program,
        inputs: &[(String, Object)],
        options: &EvalOptions,
        sink: &mut impl EffectSink,
        tracer: &mut impl EvalTracer,
    ) -> EvalOutcome {
        self.execute(program, inputs, options, sink, tracer)
    }

    /// Evaluates an LIR document containing async instructions.
    pub fn evaluate_lir_async(
        &self,
        program: &Program,
        inputs: &[(String, Object)],
        options: &EvalOptions,
        sink: &mut impl EffectSink,
        tracer: &mut impl EvalTracer,
    ) -> EvalOutcome {
        self.execute(program, inputs, options, sink, tracer)
    }

    fn execute(
        &self,
        program: &Program,
        inputs: &[(String, Object)],
        options: &EvalOptions,
        sink: &mut impl EffectSink,
        tracer: &mut impl EvalTracer,
    ) -> EvalOutcome {
        let context = EvalContext::new(
            program,
            &self.ops,
            &self.effects,
            self.resolver.as_ref(),
            options.limits,
            options.scheduler,
            options.detectors,
            inputs,
            sink,
            tracer,
        );
        let mut context = match context {
            Ok(context) => context,
            Err(err) => {
                return EvalOutcome {
                    result: Object::from_error(err.into_error_value()),
                    state: EvalState {
                        cells: IndexMap::new(),
                        steps_taken: 0,
                        tasks_spawned: 0,
                        heap: HeapStats {
                            live_objects: 0,
                            objects_by_kind: std::collections::BTreeMap::new(),
                        },
                    },
                };
            }
        };

        let outcome: RunResult<Value> = context.run_document();

        // Wind down: leftover pending tasks resolve with an error and live
        // channel handles stop accepting sends.
        context.sched.cancel("evaluation finished");
        context.channels.close_all();

        let result = match outcome {
            Ok(value) => context.to_object(&value),
            Err(err) => Object::from_error(err.into_error_value()),
        };
        let cells = context
            .cells
            .iter_named()
            .map(|(name, value)| (name.clone(), context.to_object(value)))
            .collect();
        EvalOutcome {
            result,
            state: EvalState {
                cells,
                steps_taken: context.steps.taken(),
                tasks_spawned: context.sched.task_count().saturating_sub(1),
                heap: context.heap.stats(),
            },
        }
    }
}
