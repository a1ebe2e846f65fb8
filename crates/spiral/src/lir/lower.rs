//! PIR→LIR lowering: transforms a document's expression graph into CFG form.
//!
//! Each top-level expression node becomes one or more fresh blocks whose
//! final effect is binding the node's id as a register; blocks chain via
//! `jump` in document order and the final block returns the result register.
//! Three kind-sets lower differently:
//!
//! - PIR-only (`spawn`, `await`, `send`, `recv`, `par`) → async instructions
//!   and fork/join terminators
//! - EIR-only loops (`while`, `for`) and sequencing → head/body/exit block
//!   triples and cell writes
//! - CIR-only (pure expressions) → single-instruction blocks
//!
//! Forms whose control flow cannot be usefully flattened (`try`, `select`
//! with options, `iter`) stay as single `assign` instructions carrying the
//! expression inline; the instruction dispatcher evaluates them through the
//! expression evaluator.
//!
//! Lambda-reachable nodes are not lowered: they stay in the output document
//! as expression nodes, because their meaning depends on the closure
//! application's environment.

use crate::{
    document::{Document, Node, Program},
    errors::ErrorValue,
    eval::compute_bound_set,
    expr::{Arg, Expr, Literal},
    lir::{Block, ChannelOpKind, Instruction, Terminator},
    types::TypeTag,
};

/// Lowers every eligible expression node of `program` into one CFG block
/// node, preserving reference nodes, existing block nodes, bound expression
/// nodes, airDefs, and `$defs`.
pub fn lower_program(program: &Program) -> Result<Program, ErrorValue> {
    let mut lowerer = Lowerer::new(program);
    lowerer.run()?;

    let doc = program.document();
    let cfg_id = unique_id("cfg", program);
    let mut nodes = vec![Node::Block {
        id: cfg_id.clone(),
        blocks: lowerer.blocks,
        entry: lowerer.entry,
    }];
    let bound = compute_bound_set(program);
    for (index, node) in doc.nodes.iter().enumerate() {
        let keep = match node {
            Node::Expr { .. } => bound.contains(&index),
            Node::Block { .. } | Node::Ref { .. } => true,
        };
        if keep {
            nodes.push(node.clone());
        }
    }

    Program::from_document(Document {
        version: doc.version.clone(),
        nodes,
        result: cfg_id,
        capabilities: doc.capabilities.clone(),
        air_defs: doc.air_defs.clone(),
        defs: doc.defs.clone(),
    })
}

/// Picks a node id not already used by the document.
fn unique_id(base: &str, program: &Program) -> String {
    if program.node(base).is_none() {
        return base.to_owned();
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{base}{counter}");
        if program.node(&candidate).is_none() {
            return candidate;
        }
        counter += 1;
    }
}

/// A void literal expression, used for statement-valued forms.
fn void_expr() -> Expr {
    Expr::Lit(Literal {
        ty: TypeTag::Void,
        value: serde_json::Value::Null,
    })
}

struct Lowerer<'p> {
    program: &'p Program,
    blocks: Vec<Block>,
    /// Instructions of the block currently being filled.
    current: Vec<Instruction>,
    current_id: String,
    entry: String,
    next_block: u32,
    next_temp: u32,
}

impl<'p> Lowerer<'p> {
    fn new(program: &'p Program) -> Self {
        let entry = "b0".to_owned();
        Self {
            program,
            blocks: Vec::new(),
            current: Vec::new(),
            current_id: entry.clone(),
            entry,
            next_block: 1,
            next_temp: 0,
        }
    }

    fn fresh_block(&mut self) -> String {
        let id = format!("b{}", self.next_block);
        self.next_block += 1;
        id
    }

    fn fresh_temp(&mut self) -> String {
        let id = format!("%t{}", self.next_temp);
        self.next_temp += 1;
        id
    }

    /// Closes the current block with `terminator` and opens `next`.
    fn seal(&mut self, terminator: Terminator, next: String) {
        self.blocks.push(Block {
            id: std::mem::replace(&mut self.current_id, next),
            instructions: std::mem::take(&mut self.current),
            terminator,
        });
    }

    /// Emits a detached task body block (not part of the jump chain) that
    /// computes `task` and returns it. Used by spawn/fork lowering.
    fn emit_task_block(&mut self, task: &Arg) -> String {
        let id = self.fresh_block();
        let result = self.fresh_temp();
        self.blocks.push(Block {
            id: id.clone(),
            instructions: vec![Instruction::Assign {
                target: result.clone(),
                expr: task.clone(),
            }],
            terminator: Terminator::Return { value: Some(result) },
        });
        id
    }

    fn run(&mut self) -> Result<(), ErrorValue> {
        let bound = compute_bound_set(self.program);
        for (index, node) in self.program.document().nodes.iter().enumerate() {
            if bound.contains(&index) {
                continue;
            }
            if let Node::Expr { id, expr } = node {
                let target = id.clone();
                self.lower_into(&target, expr);
            }
        }
        let result = self.program.result_id().to_owned();
        self.seal(Terminator::Return { value: Some(result) }, String::new());
        Ok(())
    }

    /// Lowers one expression so that register `target` ends up holding its
    /// value.
    fn lower_into(&mut self, target: &str, expr: &Expr) {
        match expr {
            // Registry applications get dedicated instructions.
            Expr::Call { ns, name, args } => {
                self.current.push(Instruction::Op {
                    target: target.to_owned(),
                    ns: ns.clone(),
                    name: name.clone(),
                    args: args.clone(),
                });
            }
            Expr::AirRef { ns, name, args } => {
                self.current.push(Instruction::Call {
                    target: target.to_owned(),
                    ns: ns.clone(),
                    name: name.clone(),
                    args: args.clone(),
                });
            }

            // Sequencing flattens into instruction order.
            Expr::Seq { first, then } => {
                let scratch = self.fresh_temp();
                self.lower_arg_into(&scratch, first);
                self.lower_arg_into(target, then);
            }
            Expr::Assign {
                target: cell,
                value,
            } => {
                let scratch = self.fresh_temp();
                self.lower_arg_into(&scratch, value);
                self.current.push(Instruction::AssignRef {
                    target: cell.clone(),
                    value: scratch,
                });
                self.assign_void(target);
            }
            Expr::Effect { op, args } => {
                self.current.push(Instruction::Effect {
                    op: op.clone(),
                    args: args.clone(),
                    target: Some(target.to_owned()),
                });
            }

            // Loops become head/body/exit triples.
            Expr::While { cond, body } => {
                let head = self.fresh_block();
                let body_block = self.fresh_block();
                let exit = self.fresh_block();

                self.seal(Terminator::Jump { to: head.clone() }, head.clone());
                let cond_reg = self.fresh_temp();
                self.lower_arg_into(&cond_reg, cond);
                self.seal(
                    Terminator::Cond {
                        value: Arg::Ref(cond_reg),
                        then: body_block.clone(),
                        otherwise: exit.clone(),
                    },
                    body_block,
                );
                let scratch = self.fresh_temp();
                self.lower_arg_into(&scratch, body);
                self.seal(Terminator::Jump { to: head }, exit);
                self.assign_void(target);
            }
            Expr::For {
                var,
                init,
                cond,
                update,
                body,
            } => {
                let init_reg = self.fresh_temp();
                self.lower_arg_into(&init_reg, init);
                self.current.push(Instruction::AssignRef {
                    target: var.clone(),
                    value: init_reg,
                });

                let head = self.fresh_block();
                let body_block = self.fresh_block();
                let exit = self.fresh_block();

                self.seal(Terminator::Jump { to: head.clone() }, head.clone());
                let cond_reg = self.fresh_temp();
                self.lower_arg_into(&cond_reg, cond);
                self.seal(
                    Terminator::Cond {
                        value: Arg::Ref(cond_reg),
                        then: body_block.clone(),
                        otherwise: exit.clone(),
                    },
                    body_block,
                );
                let scratch = self.fresh_temp();
                self.lower_arg_into(&scratch, body);
                let update_reg = self.fresh_temp();
                self.lower_arg_into(&update_reg, update);
                self.seal(Terminator::Jump { to: head }, exit);
                self.assign_void(target);
            }

            // Concurrency maps onto async instructions and fork/join.
            Expr::Spawn { task } => {
                let task_block = self.emit_task_block(task);
                self.current.push(Instruction::Spawn {
                    target: target.to_owned(),
                    task: task_block,
                    args: None,
                });
            }
            Expr::Await {
                future,
                timeout: None,
                fallback: None,
                return_index: false,
            } => {
                let future_reg = self.fresh_temp();
                self.lower_arg_into(&future_reg, future);
                self.current.push(Instruction::Await {
                    target: target.to_owned(),
                    future: Arg::Ref(future_reg),
                });
            }
            Expr::Send { channel, value } => {
                self.current.push(Instruction::ChannelOp {
                    op: ChannelOpKind::Send,
                    channel: channel.clone(),
                    value: Some(value.clone()),
                    target: Some(target.to_owned()),
                });
            }
            Expr::Recv { channel } => {
                self.current.push(Instruction::ChannelOp {
                    op: ChannelOpKind::Recv,
                    channel: channel.clone(),
                    value: None,
                    target: Some(target.to_owned()),
                });
            }
            Expr::Par { branches } => {
                let task_blocks: Vec<String> = branches.iter().map(|branch| self.emit_task_block(branch)).collect();
                let join_block = self.fresh_block();
                let continuation = self.fresh_block();
                self.seal(
                    Terminator::Fork {
                        branches: task_blocks,
                        to: join_block.clone(),
                    },
                    join_block,
                );
                self.seal(
                    Terminator::Join {
                        target: Some(target.to_owned()),
                        to: continuation.clone(),
                    },
                    continuation,
                );
            }

            // Everything else (pure CIR, and control forms whose flow cannot
            // be flattened) lowers to a single assign instruction.
            other => {
                self.current.push(Instruction::Assign {
                    target: target.to_owned(),
                    expr: Arg::inline(other.clone()),
                });
            }
        }
    }

    /// Lowers an argument slot into `target`: references copy, inline
    /// expressions recurse.
    fn lower_arg_into(&mut self, target: &str, arg: &Arg) {
        match arg {
            Arg::Ref(_) => {
                self.current.push(Instruction::Assign {
                    target: target.to_owned(),
                    expr: arg.clone(),
                });
            }
            Arg::Inline(expr) => self.lower_into(target, expr),
        }
    }

    fn assign_void(&mut self, target: &str) {
        self.current.push(Instruction::Assign {
            target: target.to_owned(),
            expr: Arg::inline(void_expr()),
        });
    }
}
