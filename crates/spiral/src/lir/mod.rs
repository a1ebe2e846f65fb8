//! LIR: the control-flow-graph form.
//!
//! LIR documents contain plain expression nodes (evaluated as AIR/CIR) or
//! block nodes. A block node holds a local CFG of [`Block`]s, each a sequence
//! of primitive [`Instruction`]s closed by a [`Terminator`].
//!
//! # Module Structure
//!
//! - `mod` - block, instruction, and terminator types
//! - `eval` - the CFG interpreter (phi resolution, step budget, async
//!   instructions)
//! - `lower` - PIR→LIR lowering

pub(crate) mod eval;
pub mod lower;

use serde::{Deserialize, Serialize};

use crate::expr::Arg;

/// One basic block: instructions in order, then a terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// One phi source: the value `id` to pick when control arrived from `block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhiSource {
    pub block: String,
    pub id: String,
}

/// Channel operation selector for [`Instruction::ChannelOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelOpKind {
    Send,
    Recv,
    TrySend,
    TryRecv,
}

/// A primitive LIR operation.
///
/// Targets name registers in the block-local environment. Instruction
/// operands are [`Arg`]s, so lowered code can reference registers, sibling
/// nodes, or small inline literals uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Instruction {
    /// Evaluate an expression and bind the result to `target`.
    Assign { target: String, expr: Arg },
    /// Apply a registry operator and bind the result.
    Call {
        target: String,
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Same dispatch as `Call`; kept distinct because lowering emits `op` for
    /// pure operators and `call` for airDef-resolvable targets.
    Op {
        target: String,
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Dispatch a side-effecting operation, optionally binding its result.
    Effect {
        op: String,
        #[serde(default)]
        args: Vec<Arg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Write a resolved value into the ref-cell named `target`.
    AssignRef { target: String, value: String },
    /// Select the incoming value matching the predecessor block.
    Phi { target: String, sources: Vec<PhiSource> },
    /// Spawn a task executing the referenced task block; binds the future.
    Spawn {
        target: String,
        task: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Arg>>,
    },
    /// Channel operation; `value` for sends, `target` for results.
    ChannelOp {
        op: ChannelOpKind,
        channel: Arg,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Arg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Await a future and bind its value.
    Await { target: String, future: Arg },
}

/// How a block ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Terminator {
    /// Exit the CFG with the named register's value (or void).
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    /// Unconditional jump.
    Jump { to: String },
    /// Two-way branch on a boolean value.
    Cond {
        value: Arg,
        then: String,
        #[serde(rename = "else")]
        otherwise: String,
    },
    /// Spawn each branch block as a task, then continue at `to`.
    ///
    /// The spawned futures are pushed onto the execution's fork stack, in
    /// branch order, for a later `join`.
    Fork { branches: Vec<String>, to: String },
    /// Await the most recent fork's futures; results (in branch order) are
    /// bound as a list to `target` when given.
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        to: String,
    },
}
