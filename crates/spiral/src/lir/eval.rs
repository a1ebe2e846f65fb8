//! The CFG interpreter: block execution, phi resolution, terminators.

use ahash::{AHashMap, AHashSet};

use crate::{
    channel::SendAttempt,
    detect::AccessKind,
    document::Node,
    env::FrameId,
    errors::{RunError, RunResult},
    eval::EvalContext,
    expr::Arg,
    lir::{Block, ChannelOpKind, Instruction, PhiSource, Terminator},
    task::{TaskId, ThunkBody},
    value::Value,
};

/// Runs a block node's CFG starting at `entry`, under a fresh register frame
/// derived from `frame`.
///
/// Instruction targets bind registers in that frame; bare-string operands
/// resolve registers first, then ref-cells, then document nodes. Re-visiting
/// a block counts against the evaluation's step budget; exhausting it yields
/// `NonTermination`.
pub(crate) fn run_block_node(ctx: &mut EvalContext, node_id: &str, entry: &str, frame: FrameId) -> RunResult<Value> {
    let program = ctx.program;
    let Some(Node::Block { blocks, .. }) = program.node(node_id) else {
        return Err(RunError::validation(format!("'{node_id}' is not a block node")));
    };
    let by_id: AHashMap<&str, &Block> = blocks.iter().map(|block| (block.id.as_str(), block)).collect();

    let registers = ctx.frames.child(frame);
    let mut predecessor: Option<String> = None;
    let mut visited: AHashSet<String> = AHashSet::new();
    // Futures spawned by `fork` terminators, grouped per fork, awaiting join.
    let mut fork_stack: Vec<Vec<TaskId>> = Vec::new();

    let mut current = entry.to_owned();
    loop {
        let Some(block) = by_id.get(current.as_str()) else {
            return Err(RunError::validation(format!(
                "block '{current}' not found in node '{node_id}'"
            )));
        };
        if !visited.insert(current.clone()) {
            ctx.steps.tick()?;
        }

        for instruction in &block.instructions {
            exec_instruction(ctx, instruction, node_id, &by_id, registers, predecessor.as_deref())?;
        }

        match &block.terminator {
            Terminator::Return { value } => {
                return match value {
                    Some(name) => ctx.resolve_name(name, registers),
                    None => Ok(Value::Void),
                };
            }
            Terminator::Jump { to } => {
                predecessor = Some(current);
                current = to.clone();
            }
            Terminator::Cond { value, then, otherwise } => {
                let cond = ctx.eval_arg(value, registers)?;
                let cond = cond.expect_bool(&ctx.heap, "cond terminator")?;
                predecessor = Some(current);
                current = if cond { then.clone() } else { otherwise.clone() };
            }
            Terminator::Fork { branches, to } => {
                ctx.require_async()?;
                let mut spawned = Vec::with_capacity(branches.len());
                for branch in branches {
                    let body = ThunkBody::Block {
                        node_id: node_id.to_owned(),
                        entry: branch.clone(),
                    };
                    spawned.push(ctx.spawn_task(body, registers)?);
                }
                fork_stack.push(spawned);
                predecessor = Some(current);
                current = to.clone();
            }
            Terminator::Join { target, to } => {
                ctx.require_async()?;
                let spawned = fork_stack
                    .pop()
                    .ok_or_else(|| RunError::validation("join without a matching fork"))?;
                let mut results = Vec::with_capacity(spawned.len());
                for id in spawned {
                    ctx.sched.add_waiter(id, ctx.current_task);
                    let value = ctx.join_forked(id)?;
                    results.push(value);
                }
                if let Some(target) = target {
                    let list = ctx.heap.alloc_list(results)?;
                    ctx.frames.bind(registers, target.clone(), list);
                }
                predecessor = Some(current);
                current = to.clone();
            }
        }
    }
}

fn exec_instruction(
    ctx: &mut EvalContext,
    instruction: &Instruction,
    node_id: &str,
    blocks: &AHashMap<&str, &Block>,
    registers: FrameId,
    predecessor: Option<&str>,
) -> RunResult<()> {
    match instruction {
        Instruction::Assign { target, expr } => {
            let value = ctx.eval_arg(expr, registers)?;
            ctx.frames.bind(registers, target.clone(), value);
        }
        Instruction::Call { target, ns, name, args } => {
            let values = ctx.eval_args(args, registers)?;
            let key = format!("{ns}:{name}");
            let result = if let Some(closure) = ctx.airdefs.get(&key) {
                let closure = closure.clone();
                ctx.apply_closure(&closure, values)?
            } else {
                ctx.ops.apply(ns, name, &values, &mut ctx.heap)?
            };
            ctx.frames.bind(registers, target.clone(), result);
        }
        Instruction::Op { target, ns, name, args } => {
            let values = ctx.eval_args(args, registers)?;
            let result = ctx.ops.apply(ns, name, &values, &mut ctx.heap)?;
            ctx.frames.bind(registers, target.clone(), result);
        }
        Instruction::Effect { op, args, target } => {
            ctx.tracer.on_effect(op);
            let values = ctx.eval_args(args, registers)?;
            let result = ctx.effects.dispatch(op, &values, &mut ctx.heap, &mut *ctx.sink)?;
            if let Some(target) = target {
                ctx.frames.bind(registers, target.clone(), result);
            }
        }
        Instruction::AssignRef { target, value } => {
            let resolved = ctx.resolve_name(value, registers)?;
            ctx.record_access(target, AccessKind::Write);
            ctx.cells.assign(target, resolved);
        }
        Instruction::Phi { target, sources } => {
            let value = resolve_phi(ctx, sources, registers, predecessor)?;
            ctx.frames.bind(registers, target.clone(), value);
        }
        Instruction::Spawn { target, task, args } => {
            ctx.require_async()?;
            // Extra arguments bind as arg0, arg1, ... in the task's
            // environment snapshot.
            let mut spawn_frame = registers;
            if let Some(args) = args {
                let values = ctx.eval_args(args, registers)?;
                spawn_frame = ctx.frames.child(registers);
                for (position, value) in values.into_iter().enumerate() {
                    ctx.frames.bind(spawn_frame, format!("arg{position}"), value);
                }
            }
            let body = if blocks.contains_key(task.as_str()) {
                ThunkBody::Block {
                    node_id: node_id.to_owned(),
                    entry: task.clone(),
                }
            } else {
                ThunkBody::Expr(Arg::Ref(task.clone()))
            };
            let id = ctx.spawn_task(body, spawn_frame)?;
            ctx.frames.bind(registers, target.clone(), Value::Future(id));
        }
        Instruction::ChannelOp {
            op,
            channel,
            value,
            target,
        } => {
            ctx.require_async()?;
            let result = exec_channel_op(ctx, *op, channel, value.as_ref(), registers)?;
            if let Some(target) = target {
                ctx.frames.bind(registers, target.clone(), result);
            }
        }
        Instruction::Await { target, future } => {
            ctx.require_async()?;
            let value = ctx.eval_await(future, None, None, false, registers)?;
            ctx.frames.bind(registers, target.clone(), value);
        }
    }
    Ok(())
}

/// Phi resolution: the source matching the predecessor wins; with no match
/// (entry block after unusual lowering), the first source whose id resolves
/// to a non-error value is used.
fn resolve_phi(
    ctx: &mut EvalContext,
    sources: &[PhiSource],
    registers: FrameId,
    predecessor: Option<&str>,
) -> RunResult<Value> {
    if let Some(predecessor) = predecessor
        && let Some(source) = sources.iter().find(|source| source.block == predecessor)
    {
        return ctx.resolve_name(&source.id, registers);
    }
    for source in sources {
        if let Ok(value) = ctx.resolve_name(&source.id, registers)
            && !matches!(value, Value::Error(_))
        {
            return Ok(value);
        }
    }
    Err(RunError::validation("phi instruction has no resolvable source"))
}

fn exec_channel_op(
    ctx: &mut EvalContext,
    op: ChannelOpKind,
    channel: &Arg,
    value: Option<&Arg>,
    registers: FrameId,
) -> RunResult<Value> {
    match op {
        ChannelOpKind::Send => {
            let value = value.ok_or_else(|| RunError::validation("channelOp send requires a value"))?;
            ctx.eval_send(channel, value, registers)
        }
        ChannelOpKind::Recv => ctx.eval_recv(channel, registers),
        ChannelOpKind::TrySend => {
            let value = value.ok_or_else(|| RunError::validation("channelOp trySend requires a value"))?;
            let handle = ctx.eval_arg(channel, registers)?;
            let Value::Channel(id) = handle else {
                return Err(RunError::type_error(format!(
                    "trySend expects channel, got {}",
                    handle.type_tag(&ctx.heap)
                )));
            };
            let value = ctx.eval_arg(value, registers)?;
            let (attempt, _) = ctx.channels.get_mut(id).try_send(value);
            let accepted = attempt == SendAttempt::Accepted;
            if accepted {
                ctx.tracer.on_channel("trySend", id.raw());
            }
            Ok(Value::Bool(accepted))
        }
        ChannelOpKind::TryRecv => {
            let handle = ctx.eval_arg(channel, registers)?;
            let Value::Channel(id) = handle else {
                return Err(RunError::type_error(format!(
                    "tryRecv expects channel, got {}",
                    handle.type_tag(&ctx.heap)
                )));
            };
            match ctx.channels.get_mut(id).try_recv() {
                Some(value) => {
                    ctx.tracer.on_channel("tryRecv", id.raw());
                    Ok(value)
                }
                None => Ok(Value::Void),
            }
        }
    }
}
