#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "store helpers back more than one evaluator layer")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "index casts are range-checked first")]
#![expect(clippy::cast_possible_wrap, reason = "length-to-i64 casts stay in range")]
#![expect(clippy::must_use_candidate, reason = "accessor return values are optional to consume")]
#![expect(clippy::missing_panics_doc, reason = "internal panics are arena-invariant violations")]
#![expect(clippy::return_self_not_must_use, reason = "builder setters are chained immediately")]

mod channel;
mod closure;
mod detect;
mod document;
mod effects;
mod engine;
mod env;
mod errors;
mod eval;
mod expr;
mod heap;
mod limits;
mod lir;
mod object;
mod ops;
mod resolve;
mod sched;
mod subst;
mod task;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    channel::ChannelId,
    closure::Closure,
    detect::{AccessKind, DeadlockCycle, DeadlockDetector, DetectorConfig, RaceDetector, RaceKind, RaceReport},
    document::{AirDef, CAPABILITY_ASYNC, Document, Node, Program},
    effects::{CollectSink, EffectFn, EffectRegistry, EffectSink, NoSink, StdSink},
    engine::{EvalOptions, EvalOutcome, EvalState, Evaluator},
    env::{CellId, FrameId},
    errors::{ErrorCode, ErrorValue, RunError, RunResult},
    expr::{Arg, Expr, Literal, Param},
    heap::{Heap, HeapData, HeapId, HeapStats, OpaqueValue, SelectOutcome, SetValue},
    limits::{DEFAULT_LOOP_CAP, DEFAULT_MAX_REF_DEPTH, DEFAULT_MAX_STEPS, EvalLimits},
    lir::{Block, ChannelOpKind, Instruction, PhiSource, Terminator, lower::lower_program},
    object::Object,
    ops::{OpBuilder, OpFn, Operator, OperatorRegistry},
    resolve::RefResolver,
    sched::SchedulerMode,
    subst::{FreshNames, alpha_rename, free_vars, substitute},
    task::TaskId,
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    types::{CompoundType, Type, TypeTag},
    value::Value,
};
