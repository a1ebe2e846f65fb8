//! The EIR extensions: sequencing, assignment, mutable cells, loops, effect
//! dispatch, and try/catch.

use crate::{
    detect::AccessKind,
    env::FrameId,
    errors::{RunError, RunResult},
    eval::EvalContext,
    expr::Arg,
    value::Value,
};

impl EvalContext<'_> {
    /// `seq(first, then)`: evaluate both, return `then`. An error in `first`
    /// ends the sequence early.
    pub(super) fn eval_seq(&mut self, first: &Arg, then: &Arg, frame: FrameId) -> RunResult<Value> {
        self.eval_arg(first, frame)?;
        self.eval_arg(then, frame)
    }

    /// `assign(target, value)`: write into the named ref-cell, creating it
    /// on first write.
    pub(super) fn eval_assign(&mut self, target: &str, value: &Arg, frame: FrameId) -> RunResult<Value> {
        let value = self.eval_arg(value, frame)?;
        self.record_access(target, AccessKind::Write);
        self.cells.assign(target, value);
        Ok(Value::Void)
    }

    /// `while(cond, body)`: bounded by the loop safety cap; hitting the cap
    /// exits normally with a tracer warning.
    pub(super) fn eval_while(&mut self, cond: &Arg, body: &Arg, frame: FrameId) -> RunResult<Value> {
        let mut iterations = 0u32;
        loop {
            let keep_going = self.eval_arg(cond, frame)?.expect_bool(&self.heap, "while condition")?;
            if !keep_going {
                break;
            }
            self.eval_arg(body, frame)?;
            iterations += 1;
            if iterations >= self.limits.loop_cap {
                self.tracer.on_loop_cap("while");
                break;
            }
            self.loop_suspension_hook()?;
        }
        Ok(Value::Void)
    }

    /// `for(var, init, cond, update, body)`: C-style loop over a ref-cell
    /// loop variable, same safety cap as `while`.
    pub(super) fn eval_for(
        &mut self,
        var: &str,
        init: &Arg,
        cond: &Arg,
        update: &Arg,
        body: &Arg,
        frame: FrameId,
    ) -> RunResult<Value> {
        let initial = self.eval_arg(init, frame)?;
        self.record_access(var, AccessKind::Write);
        self.cells.assign(var, initial);

        let mut iterations = 0u32;
        loop {
            let keep_going = self.eval_arg(cond, frame)?.expect_bool(&self.heap, "for condition")?;
            if !keep_going {
                break;
            }
            self.eval_arg(body, frame)?;
            self.eval_arg(update, frame)?;
            iterations += 1;
            if iterations >= self.limits.loop_cap {
                self.tracer.on_loop_cap("for");
                break;
            }
            self.loop_suspension_hook()?;
        }
        Ok(Value::Void)
    }

    /// `iter(var, iter, body)`: evaluate `iter` to a list and run the body
    /// once per element with `var` lexically bound.
    pub(super) fn eval_iter(&mut self, var: &str, iter: &Arg, body: &Arg, frame: FrameId) -> RunResult<Value> {
        let source = self.eval_arg(iter, frame)?;
        let items = source.expect_list(&self.heap, "iter source")?.to_vec();
        for (position, item) in items.into_iter().enumerate() {
            if position as u32 >= self.limits.loop_cap {
                self.tracer.on_loop_cap("iter");
                break;
            }
            let inner = self.frames.child(frame);
            self.frames.bind(inner, var.to_owned(), item);
            self.eval_arg(body, inner)?;
            self.loop_suspension_hook()?;
        }
        Ok(Value::Void)
    }

    /// `effect(op, args)`: dispatch through the effect registry (with its
    /// async-hook fallback).
    pub(super) fn eval_effect(&mut self, op: &str, args: &[Arg], frame: FrameId) -> RunResult<Value> {
        self.tracer.on_effect(op);
        let values = self.eval_args(args, frame)?;
        self.effects.dispatch(op, &values, &mut self.heap, &mut *self.sink)
    }

    /// `refCell(target)`: the cell handle for `target`, creating a
    /// void-holding cell when absent.
    pub(super) fn eval_refcell(&mut self, target: &str) -> RunResult<Value> {
        let id = match self.cells.id_of(target) {
            Some(id) => id,
            None => self.cells.assign(target, Value::Void),
        };
        Ok(Value::Cell(id))
    }

    /// `deref(target)`: unwrap a ref value to its inner value.
    pub(super) fn eval_deref(&mut self, target: &Arg, frame: FrameId) -> RunResult<Value> {
        let value = self.eval_arg(target, frame)?;
        match value {
            Value::Cell(id) => {
                if let Some(race) = &mut self.race {
                    race.record_access(self.current_task.raw(), &format!("cell#{}", id.index()), AccessKind::Read);
                }
                Ok(self.cells.read(id).clone())
            }
            other => Err(RunError::type_error(format!(
                "deref expects ref, got {}",
                other.type_tag(&self.heap)
            ))),
        }
    }

    /// `try(body, catchParam, catchBody, fallback?)`.
    ///
    /// Catchable errors bind to the catch parameter as first-class error
    /// values; on success, a present `fallback` replaces the try result.
    pub(super) fn eval_try(
        &mut self,
        body: &Arg,
        catch_param: &str,
        catch_body: &Arg,
        fallback: Option<&Arg>,
        frame: FrameId,
    ) -> RunResult<Value> {
        match self.eval_arg(body, frame) {
            Ok(value) => match fallback {
                Some(fallback) => self.eval_arg(fallback, frame),
                None => Ok(value),
            },
            Err(RunError::Raise(err)) => {
                let inner = self.frames.child(frame);
                self.frames.bind(inner, catch_param.to_owned(), Value::Error(err));
                self.eval_arg(catch_body, inner)
            }
            Err(fatal) => Err(fatal),
        }
    }
}
