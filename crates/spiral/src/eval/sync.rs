//! The synchronous AIR/CIR evaluator: pure expressions, closures, `let`,
//! `if`, recursion via `fix`.

use std::str::FromStr;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    closure::Closure,
    env::FrameId,
    errors::{ErrorCode, RunError, RunResult},
    eval::EvalContext,
    expr::{Arg, Expr, Literal},
    heap::{HeapData, OpaqueValue, SetValue},
    types::TypeTag,
    value::Value,
};

impl EvalContext<'_> {
    /// Evaluates one expression under `frame`. The single dispatch point for
    /// every layer; imperative and concurrent kinds delegate to their
    /// modules.
    pub fn eval_expr(&mut self, expr: &Expr, frame: FrameId) -> RunResult<Value> {
        match expr {
            // --- AIR/CIR ---
            Expr::Lit(literal) => self.literal_value(literal),
            Expr::Var { name } => self.eval_var(name, frame),
            Expr::Ref { id } => self.eval_node_ref(id, frame),
            Expr::Call { ns, name, args } => {
                let values = self.eval_args(args, frame)?;
                self.ops.apply(ns, name, &values, &mut self.heap)
            }
            Expr::AirRef { ns, name, args } => self.eval_airref(ns, name, args, frame),
            Expr::CallExpr { func, args } => {
                let callee = self.eval_arg(func, frame)?;
                let values = self.eval_args(args, frame)?;
                self.apply_closure(&callee, values)
            }
            Expr::If { cond, then, otherwise } => {
                let cond = self.eval_arg(cond, frame)?;
                let cond = cond.expect_bool(&self.heap, "if condition")?;
                if cond {
                    self.eval_arg(then, frame)
                } else {
                    self.eval_arg(otherwise, frame)
                }
            }
            Expr::Let { name, value, body } => {
                let value = self.eval_arg(value, frame)?;
                let inner = self.frames.child(frame);
                self.frames.bind(inner, name.clone(), value);
                self.eval_arg(body, inner)
            }
            Expr::Lambda { params, body } => {
                let closure = Closure::new(params.clone(), body.clone(), frame);
                let id = self.heap.allocate(HeapData::Closure(closure))?;
                Ok(Value::Ref(id))
            }
            Expr::Fix { func } => self.eval_fix(func, frame),
            Expr::Do { exprs } => {
                let mut last = Value::Void;
                for item in exprs {
                    last = self.eval_arg(item, frame)?;
                }
                Ok(last)
            }
            Expr::Predicate { name, value } => {
                let value = self.eval_arg(value, frame)?;
                self.eval_predicate(name, &value)
            }

            // --- EIR ---
            Expr::Seq { first, then } => self.eval_seq(first, then, frame),
            Expr::Assign { target, value } => self.eval_assign(target, value, frame),
            Expr::While { cond, body } => self.eval_while(cond, body, frame),
            Expr::For {
                var,
                init,
                cond,
                update,
                body,
            } => self.eval_for(var, init, cond, update, body, frame),
            Expr::Iter { var, iter, body } => self.eval_iter(var, iter, body, frame),
            Expr::Effect { op, args } => self.eval_effect(op, args, frame),
            Expr::RefCell { target } => self.eval_refcell(target),
            Expr::Deref { target } => self.eval_deref(target, frame),
            Expr::Try {
                body,
                catch_param,
                catch_body,
                fallback,
            } => self.eval_try(body, catch_param, catch_body, fallback.as_ref(), frame),

            // --- PIR ---
            concurrent => {
                self.require_async()?;
                self.eval_concurrent(concurrent, frame)
            }
        }
    }

    /// Evaluates argument slots left to right.
    pub fn eval_args(&mut self, args: &[Arg], frame: FrameId) -> RunResult<SmallVec<[Value; 4]>> {
        let mut values = SmallVec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_arg(arg, frame)?);
        }
        Ok(values)
    }

    /// `var`: lexical environment, then the ref-cell table (mutable state
    /// shadows in imperative contexts). Node ids are *not* consulted; that
    /// is what `ref` is for.
    fn eval_var(&mut self, name: &str, frame: FrameId) -> RunResult<Value> {
        if let Some(value) = self.frames.lookup(frame, name) {
            return Ok(value.clone());
        }
        if let Some(cell) = self.cells.id_of(name) {
            self.record_access(name, crate::detect::AccessKind::Read);
            return Ok(self.cells.read(cell).clone());
        }
        Err(RunError::raise(
            ErrorCode::UnboundIdentifier,
            format!("unbound identifier '{name}'"),
        ))
    }

    /// `ref(id)`: evaluate the target node under the current environment,
    /// memoizing through the node cache.
    fn eval_node_ref(&mut self, id: &str, frame: FrameId) -> RunResult<Value> {
        match self.program.node_index(id) {
            Some(index) => self.eval_node(index, frame),
            None => Err(RunError::validation(format!("ref target '{id}' does not name a node"))),
        }
    }

    /// `airRef`: like `call`, but `ns:name` may resolve to a desugared
    /// airDef closure before the operator registry is consulted.
    fn eval_airref(&mut self, ns: &str, name: &str, args: &[Arg], frame: FrameId) -> RunResult<Value> {
        let key = format!("{ns}:{name}");
        let values = self.eval_args(args, frame)?;
        if let Some(closure) = self.airdefs.get(&key) {
            let closure = closure.clone();
            return self.apply_closure(&closure, values);
        }
        self.ops.apply(ns, name, &values, &mut self.heap)
    }

    /// Applies a closure value to evaluated arguments.
    ///
    /// Arity is enforced against the required/declared parameter counts.
    /// Omitted optional parameters evaluate their `default` expression in
    /// the closure's captured environment; optionals without a default bind
    /// void.
    pub fn apply_closure(&mut self, callee: &Value, args: SmallVec<[Value; 4]>) -> RunResult<Value> {
        let closure = match callee {
            Value::Ref(id) => self
                .heap
                .expect_closure(*id)
                .cloned()
                .ok_or_else(|| RunError::type_error("callExpr target is not a closure"))?,
            other => {
                return Err(RunError::type_error(format!(
                    "callExpr target is not a closure (got {})",
                    other.type_tag(&self.heap)
                )));
            }
        };

        if args.len() < closure.min_arity() || args.len() > closure.max_arity() {
            return Err(RunError::raise(
                ErrorCode::ArityError,
                format!(
                    "closure expects {}..{} arguments, got {}",
                    closure.min_arity(),
                    closure.max_arity(),
                    args.len()
                ),
            ));
        }
        if self.depth >= self.limits.max_recursion_depth {
            return Err(RunError::domain(format!(
                "closure application depth exceeds {}",
                self.limits.max_recursion_depth
            )));
        }

        let call_frame = self.frames.child(closure.env);
        let mut provided = args.into_iter();
        for param in &closure.params {
            let value = match provided.next() {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => self.eval_expr(default, closure.env)?,
                    None => Value::Void,
                },
            };
            self.frames.bind(call_frame, param.name.clone(), value);
        }

        self.depth += 1;
        let result = self.eval_arg(&closure.body, call_frame);
        self.depth -= 1;
        result
    }

    /// `fix(fn)`: ties the knot through the frame arena.
    ///
    /// The self-reference lives in a fresh child frame of the source
    /// closure's environment: visible to every subsequent application, and
    /// invisible to the enclosing scope.
    fn eval_fix(&mut self, func: &Arg, frame: FrameId) -> RunResult<Value> {
        let source = self.eval_arg(func, frame)?;
        let closure = match &source {
            Value::Ref(id) => self
                .heap
                .expect_closure(*id)
                .cloned()
                .ok_or_else(|| RunError::type_error("fix expects a closure"))?,
            other => {
                return Err(RunError::type_error(format!(
                    "fix expects a closure (got {})",
                    other.type_tag(&self.heap)
                )));
            }
        };
        if closure.params.is_empty() {
            return Err(RunError::type_error("fix expects a closure with at least one parameter"));
        }

        let self_frame = self.frames.child(closure.env);
        let recursive = Closure::new(closure.params[1..].to_vec(), closure.body.clone(), self_frame);
        let recursive_id = self.heap.allocate(HeapData::Closure(recursive))?;
        self.frames
            .bind(self_frame, closure.params[0].name.clone(), Value::Ref(recursive_id));
        Ok(Value::Ref(recursive_id))
    }

    /// `predicate(name, value)`: boolean checks over values. The name is a
    /// type tag ("int", "error", ...); the check is whether the value's tag
    /// matches.
    fn eval_predicate(&mut self, name: &str, value: &Value) -> RunResult<Value> {
        match TypeTag::from_str(name) {
            Ok(tag) => Ok(Value::Bool(value.type_tag(&self.heap) == tag)),
            Err(_) => Err(RunError::domain(format!("unknown predicate '{name}'"))),
        }
    }

    /// Converts a literal's JSON payload to a runtime value under its
    /// declared tag.
    pub fn literal_value(&mut self, literal: &Literal) -> RunResult<Value> {
        let json = &literal.value;
        match literal.ty {
            TypeTag::Int => json
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| RunError::type_error(format!("int literal with non-integer payload {json}"))),
            TypeTag::Float => json
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| RunError::type_error(format!("float literal with non-numeric payload {json}"))),
            TypeTag::Bool => json
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| RunError::type_error(format!("bool literal with non-boolean payload {json}"))),
            TypeTag::String => match json.as_str() {
                Some(text) => self.heap.alloc_str(text.to_owned()),
                None => Err(RunError::type_error(format!(
                    "string literal with non-string payload {json}"
                ))),
            },
            TypeTag::Void => Ok(Value::Void),
            TypeTag::List => {
                let items = json
                    .as_array()
                    .ok_or_else(|| RunError::type_error("list literal expects an array payload"))?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.json_to_value(item)?);
                }
                self.heap.alloc_list(values)
            }
            TypeTag::Set => {
                let items = json
                    .as_array()
                    .ok_or_else(|| RunError::type_error("set literal expects an array payload"))?;
                let mut set = SetValue::new();
                for item in items {
                    let value = self.json_to_value(item)?;
                    let key = value.canonical_key(&self.heap)?;
                    set.insert(key, value);
                }
                self.heap.alloc_set(set)
            }
            TypeTag::Map => {
                let entries = json
                    .as_object()
                    .ok_or_else(|| RunError::type_error("map literal expects an object payload"))?;
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), self.json_to_value(item)?);
                }
                self.heap.alloc_map(map)
            }
            TypeTag::Opaque => {
                let tag = json
                    .get("tag")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| RunError::type_error("opaque literal expects a 'tag' string"))?;
                let payload = json.get("payload").cloned().unwrap_or(serde_json::Value::Null);
                let id = self.heap.allocate(HeapData::Opaque(OpaqueValue {
                    tag: tag.to_owned(),
                    payload,
                }))?;
                Ok(Value::Ref(id))
            }
            TypeTag::Error => {
                let code_text = json
                    .get("code")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| RunError::type_error("error literal expects a 'code' string"))?;
                let code = ErrorCode::from_str(code_text)
                    .map_err(|_| RunError::type_error(format!("unknown error code '{code_text}'")))?;
                let message = json
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                Ok(Value::Error(Box::new(crate::errors::ErrorValue { code, message })))
            }
            other => Err(RunError::validation(format!(
                "literals cannot carry values of type {other}"
            ))),
        }
    }

    /// Infers a runtime value from untagged JSON (list/map literal elements).
    fn json_to_value(&mut self, json: &serde_json::Value) -> RunResult<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Void),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Value::Int(int))
                } else if let Some(float) = number.as_f64() {
                    Ok(Value::Float(float))
                } else {
                    Err(RunError::type_error(format!("unrepresentable number {number}")))
                }
            }
            serde_json::Value::String(text) => self.heap.alloc_str(text.clone()),
            serde_json::Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.json_to_value(item)?);
                }
                self.heap.alloc_list(values)
            }
            serde_json::Value::Object(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), self.json_to_value(item)?);
                }
                self.heap.alloc_map(map)
            }
        }
    }
}
