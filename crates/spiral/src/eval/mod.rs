//! The evaluation engine.
//!
//! One [`EvalContext`] owns everything a run needs: the heap, the frame
//! arena, the ref-cell table, the memo cache, the scheduler, the channel
//! store, and the detectors. The evaluators are methods on the context,
//! split by layer:
//!
//! - `sync` - the pure AIR/CIR core (closures, let, if, fix, memoization)
//! - `imperative` - the EIR extensions (sequencing, cells, loops, try)
//! - `concurrent` - the PIR extensions plus the scheduler drive loops
//!
//! Name resolution order for bare string slots is lexical environment, then
//! ref-cell table, then document node: `let` shadows everything, and mutable
//! state shadows node values in imperative contexts, and node ids resolve
//! last.

pub(crate) mod concurrent;
pub(crate) mod imperative;
pub(crate) mod sync;

use ahash::{AHashMap, AHashSet};

use crate::{
    channel::ChannelStore,
    closure::Closure,
    detect::{AccessKind, DeadlockDetector, DetectorConfig, RaceDetector},
    document::{CAPABILITY_ASYNC, Node, Program},
    effects::{EffectRegistry, EffectSink},
    env::{Cells, FrameId, Frames},
    errors::{ErrorCode, RunError, RunResult},
    expr::{Arg, Expr},
    heap::{Heap, HeapData},
    limits::{EvalLimits, StepCounter},
    object::Object,
    ops::OperatorRegistry,
    resolve::RefResolver,
    sched::{Scheduler, SchedulerMode},
    subst::free_vars,
    task::TaskId,
    tracer::EvalTracer,
    value::Value,
};

/// Everything one evaluation owns.
///
/// Registries and the program are read-only borrows; all mutable state is
/// owned here so a single `&mut` threads through the whole run.
pub(crate) struct EvalContext<'a> {
    pub program: &'a Program,
    pub ops: &'a OperatorRegistry,
    pub effects: &'a EffectRegistry,
    pub resolver: Option<&'a RefResolver>,
    pub limits: EvalLimits,

    pub heap: Heap,
    pub frames: Frames,
    pub cells: Cells,
    /// Desugared airDef closures keyed `ns:name`.
    pub airdefs: AHashMap<String, Value>,
    /// Top-level node memo cache, keyed by node index.
    pub memo: AHashMap<usize, Value>,
    /// Lambda-reachable ("bound") node indices, excluded from the cache.
    pub bound: AHashSet<usize>,
    /// Node indices currently under evaluation (reference cycle detection).
    pub eval_stack: Vec<usize>,

    pub steps: StepCounter,
    /// Closure-application depth.
    pub depth: u32,

    pub sched: Scheduler,
    pub channels: ChannelStore,
    pub current_task: TaskId,
    pub async_allowed: bool,

    pub detector_config: DetectorConfig,
    pub race: Option<RaceDetector>,
    pub deadlock: Option<DeadlockDetector>,

    pub sink: &'a mut dyn EffectSink,
    pub tracer: &'a mut dyn EvalTracer,
}

impl<'a> EvalContext<'a> {
    /// Builds a context and seeds it with inputs and desugared airDefs.
    pub fn new(
        program: &'a Program,
        ops: &'a OperatorRegistry,
        effects: &'a EffectRegistry,
        resolver: Option<&'a RefResolver>,
        limits: EvalLimits,
        mode: SchedulerMode,
        detector_config: DetectorConfig,
        inputs: &[(String, Object)],
        sink: &'a mut dyn EffectSink,
        tracer: &'a mut dyn EvalTracer,
    ) -> RunResult<Self> {
        let mut heap = Heap::new(&limits);
        let mut frames = Frames::new();
        let root = frames.root();

        for (name, object) in inputs {
            let value = object.to_value(&mut heap)?;
            frames.bind(root, name.clone(), value);
        }

        let mut context = Self {
            program,
            ops,
            effects,
            resolver,
            steps: StepCounter::new(limits.max_steps),
            limits,
            heap,
            frames,
            cells: Cells::new(),
            airdefs: AHashMap::new(),
            memo: AHashMap::new(),
            bound: AHashSet::new(),
            eval_stack: Vec::new(),
            depth: 0,
            sched: Scheduler::new(mode),
            channels: ChannelStore::new(),
            current_task: TaskId::default(),
            async_allowed: program.has_capability(CAPABILITY_ASYNC),
            detector_config,
            race: detector_config.race.then(RaceDetector::new),
            deadlock: detector_config.deadlock.then(DeadlockDetector::new),
            sink,
            tracer,
        };
        context.bound = compute_bound_set(program);
        context.install_airdefs()?;
        Ok(context)
    }

    /// Desugars the document's airDefs into closures over the root frame.
    fn install_airdefs(&mut self) -> RunResult<()> {
        let root = self.frames.root();
        for def in &self.program.document().air_defs {
            let closure = Closure::new(def.params.clone(), def.body.clone(), root);
            let id = self.heap.allocate(HeapData::Closure(closure))?;
            self.airdefs.insert(def.key(), Value::Ref(id));
        }
        Ok(())
    }

    /// Evaluates the document: top-level nodes in order, then the result.
    ///
    /// Expression and reference nodes outside the bound set are evaluated
    /// exactly once, in document order, their values cached. Block nodes are
    /// evaluated lazily (when referenced or named as the result) because a
    /// CFG may suspend or carry side effects that belong to its consumer.
    pub fn run_document(&mut self) -> RunResult<Value> {
        let root = self.frames.root();
        for index in 0..self.program.node_count() {
            if self.bound.contains(&index) || self.memo.contains_key(&index) {
                continue;
            }
            match self.program.node_at(index) {
                Node::Expr { .. } | Node::Ref { .. } => {
                    self.eval_node(index, root)?;
                }
                Node::Block { .. } => {}
            }
        }
        let result_index = self
            .program
            .node_index(self.program.result_id())
            .ok_or_else(|| RunError::validation("result id does not name a node"))?;
        self.eval_node(result_index, root)
    }

    /// Evaluates a node by index under `frame`, with top-level memoization.
    ///
    /// Re-entering a cacheable node while it is already evaluating is a
    /// reference cycle. Bound nodes are exempt from that check; recursion
    /// through `fix` legitimately re-enters a lambda body node per
    /// application, so for them only the depth guard applies.
    pub fn eval_node(&mut self, index: usize, frame: FrameId) -> RunResult<Value> {
        if let Some(value) = self.memo.get(&index) {
            return Ok(value.clone());
        }
        let cacheable = !self.bound.contains(&index);
        if cacheable && self.eval_stack.contains(&index) {
            return Err(RunError::validation(format!(
                "reference cycle through node '{}'",
                self.program.node_at(index).id()
            )));
        }
        if self.eval_stack.len() > self.limits.max_recursion_depth as usize * 8 {
            return Err(RunError::raise(
                ErrorCode::NonTermination,
                "node reference nesting exceeds the evaluation depth guard",
            ));
        }
        self.eval_stack.push(index);
        let result = self.eval_node_uncached(index, frame);
        self.eval_stack.pop();
        let value = result?;
        if cacheable {
            self.memo.insert(index, value.clone());
        }
        Ok(value)
    }

    fn eval_node_uncached(&mut self, index: usize, frame: FrameId) -> RunResult<Value> {
        let program = self.program;
        match program.node_at(index) {
            Node::Expr { id, expr } => {
                if self.current_task.is_main() && !self.bound.contains(&index) {
                    self.tracer.on_node(id);
                }
                self.eval_expr(expr, frame)
            }
            Node::Ref { target, .. } => self.eval_reference(target, frame),
            Node::Block { id, entry, .. } => crate::lir::eval::run_block_node(self, id, entry, frame),
        }
    }

    /// Resolves a `$ref` target: a sibling node id, or a JSON-pointer-style
    /// reference resolved through the document (and the external cache when a
    /// resolver is configured).
    fn eval_reference(&mut self, target: &str, frame: FrameId) -> RunResult<Value> {
        if let Some(index) = self.program.node_index(target) {
            return self.eval_node(index, frame);
        }
        let resolved = if let Some(resolver) = self.resolver {
            resolver.resolve(target, self.program.raw())
        } else {
            RefResolver::new().resolve(target, self.program.raw())
        }
        .map_err(|err| RunError::Fatal(Box::new(err)))?;

        // The resolved JSON may be a bare expression or an `{id, expr}` node.
        let json_expr = resolved.get("expr").cloned().unwrap_or(resolved);
        let expr: Expr = serde_json::from_value(json_expr)
            .map_err(|err| RunError::validation(format!("'$ref' target '{target}' is not an expression: {err}")))?;
        self.eval_expr(&expr, frame)
    }

    /// Evaluates an argument slot: a bare string resolves through the
    /// lexical environment, then the ref-cell table, then document nodes.
    pub fn eval_arg(&mut self, arg: &Arg, frame: FrameId) -> RunResult<Value> {
        match arg {
            Arg::Inline(expr) => self.eval_expr(expr, frame),
            Arg::Ref(name) => self.resolve_name(name, frame),
        }
    }

    /// Name resolution for bare string slots.
    pub fn resolve_name(&mut self, name: &str, frame: FrameId) -> RunResult<Value> {
        if let Some(value) = self.frames.lookup(frame, name) {
            return Ok(value.clone());
        }
        if let Some(cell) = self.cells.id_of(name) {
            self.record_access(name, AccessKind::Read);
            return Ok(self.cells.read(cell).clone());
        }
        if let Some(index) = self.program.node_index(name) {
            return self.eval_node(index, frame);
        }
        Err(RunError::raise(
            ErrorCode::UnboundIdentifier,
            format!("unbound identifier '{name}'"),
        ))
    }

    /// Fails unless the document declared the `async` capability.
    pub(crate) fn require_async(&self) -> RunResult<()> {
        if self.async_allowed {
            Ok(())
        } else {
            Err(RunError::validation("document does not declare the 'async' capability"))
        }
    }

    /// Records a ref-cell access with the race detector, when enabled.
    pub fn record_access(&mut self, location: &str, kind: AccessKind) {
        if let Some(race) = &mut self.race {
            race.record_access(self.current_task.raw(), location, kind);
        }
    }

    /// Records a synchronization edge with the race detector, when enabled.
    pub fn record_sync(&mut self, task: TaskId, others: &[TaskId]) {
        if let Some(race) = &mut self.race {
            let raw: Vec<u32> = others.iter().map(|t| t.raw()).collect();
            race.record_sync_point(task.raw(), &raw);
        }
    }

    /// Runs the enabled detectors in warn-only mode, reporting via the
    /// tracer. Called periodically when `auto_detect` is set.
    pub fn auto_detect(&mut self) {
        if !self.detector_config.auto_detect {
            return;
        }
        if let Some(race) = &self.race {
            for report in race.detect() {
                self.tracer.on_detector(
                    "race",
                    &format!(
                        "{:?} on '{}' between tasks {} and {}",
                        report.kind, report.location, report.first_task, report.second_task
                    ),
                );
            }
        }
        if let Some(deadlock) = &self.deadlock {
            for cycle in deadlock.detect() {
                self.tracer
                    .on_detector("deadlock", &format!("circular wait among tasks {:?}", cycle.tasks));
            }
        }
    }

    /// Converts an internal value to a boundary object.
    pub fn to_object(&self, value: &Value) -> Object {
        Object::from_value(value, &self.heap, &self.cells)
    }
}

/// Computes the set of node indices that top-level evaluation must skip.
///
/// Two kinds of node are context-dependent:
///
/// - **Lambda-reachable** nodes: node ids appearing as lambda body
///   references, and nodes whose expression mentions a lambda parameter
///   free. These close transitively through expression references, because
///   anything such a node references is also evaluated under the closure
///   application's environment.
/// - **Task-position** nodes: targets of `spawn` and `race` and `par`
///   branches referenced by id. Their effects belong to the task that runs
///   them, not to the document pass. They do not close transitively: a
///   task body referencing a shared node (say a channel) must still see the
///   memoized top-level value.
///
/// Neither kind is memoized: each application or spawn evaluates afresh.
pub(crate) fn compute_bound_set(program: &Program) -> AHashSet<usize> {
    let mut lambda_params: AHashSet<String> = AHashSet::new();
    let mut scope_seeds: AHashSet<usize> = AHashSet::new();
    let mut task_seeds: AHashSet<usize> = AHashSet::new();

    // Pass 1: lambda body references, the full parameter name set, and
    // task-position references, from document nodes and airDef bodies alike.
    let mut visit_expr = |expr: &Expr,
                          scope_seeds: &mut AHashSet<usize>,
                          task_seeds: &mut AHashSet<usize>,
                          params: &mut AHashSet<String>| {
        walk_exprs(expr, &mut |sub| {
            let mut seed_ref = |arg: &Arg, into: &mut AHashSet<usize>| {
                if let Arg::Ref(id) = arg
                    && let Some(index) = program.node_index(id)
                {
                    into.insert(index);
                }
            };
            match sub {
                Expr::Lambda { params: lambda, body } => {
                    for param in lambda {
                        params.insert(param.name.clone());
                    }
                    seed_ref(body, scope_seeds);
                }
                Expr::Spawn { task } => seed_ref(task, task_seeds),
                Expr::Race { tasks } => {
                    for task in tasks {
                        seed_ref(task, task_seeds);
                    }
                }
                Expr::Par { branches } => {
                    for branch in branches {
                        seed_ref(branch, task_seeds);
                    }
                }
                _ => {}
            }
        });
    };
    for node in &program.document().nodes {
        if let Node::Expr { expr, .. } = node {
            visit_expr(expr, &mut scope_seeds, &mut task_seeds, &mut lambda_params);
        }
    }
    for def in &program.document().air_defs {
        if let Arg::Inline(expr) = &def.body {
            visit_expr(expr, &mut scope_seeds, &mut task_seeds, &mut lambda_params);
        } else if let Arg::Ref(id) = &def.body
            && let Some(index) = program.node_index(id)
        {
            scope_seeds.insert(index);
        }
        for param in &def.params {
            lambda_params.insert(param.name.clone());
        }
    }

    // Pass 2: nodes that mention a lambda parameter free.
    for (index, node) in program.document().nodes.iter().enumerate() {
        if let Node::Expr { expr, .. } = node
            && free_vars(expr).iter().any(|name| lambda_params.contains(name))
        {
            scope_seeds.insert(index);
        }
    }

    // Pass 3: close the scope seeds transitively through expression
    // references.
    let mut bound = scope_seeds;
    loop {
        let mut grew = false;
        for index in bound.clone() {
            if let Node::Expr { expr, .. } = program.node_at(index) {
                for name in free_vars(expr) {
                    if let Some(referenced) = program.node_index(&name)
                        && bound.insert(referenced)
                    {
                        grew = true;
                    }
                }
            }
        }
        if !grew {
            break;
        }
    }

    bound.extend(task_seeds);
    bound
}

/// Pre-order walk over an expression and every inline sub-expression.
fn walk_exprs(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    let walk_arg = |arg: &Arg, visit: &mut dyn FnMut(&Expr)| {
        if let Arg::Inline(inner) = arg {
            walk_exprs(inner, visit);
        }
    };
    match expr {
        Expr::Lit(_) | Expr::Var { .. } | Expr::Ref { .. } | Expr::RefCell { .. } | Expr::Channel { .. } => {}
        Expr::Call { args, .. } | Expr::AirRef { args, .. } | Expr::Effect { args, .. } => {
            for arg in args {
                walk_arg(arg, visit);
            }
        }
        Expr::CallExpr { func, args } => {
            walk_arg(func, visit);
            for arg in args {
                walk_arg(arg, visit);
            }
        }
        Expr::If { cond, then, otherwise } => {
            walk_arg(cond, visit);
            walk_arg(then, visit);
            walk_arg(otherwise, visit);
        }
        Expr::Let { value, body, .. } => {
            walk_arg(value, visit);
            walk_arg(body, visit);
        }
        Expr::Lambda { params, body } => {
            for param in params {
                if let Some(default) = &param.default {
                    walk_exprs(default, visit);
                }
            }
            walk_arg(body, visit);
        }
        Expr::Fix { func } => walk_arg(func, visit),
        Expr::Do { exprs } => {
            for item in exprs {
                walk_arg(item, visit);
            }
        }
        Expr::Predicate { value, .. } => walk_arg(value, visit),
        Expr::Seq { first, then } => {
            walk_arg(first, visit);
            walk_arg(then, visit);
        }
        Expr::Assign { value, .. } => walk_arg(value, visit),
        Expr::While { cond, body } => {
            walk_arg(cond, visit);
            walk_arg(body, visit);
        }
        Expr::For {
            init,
            cond,
            update,
            body,
            ..
        } => {
            walk_arg(init, visit);
            walk_arg(cond, visit);
            walk_arg(update, visit);
            walk_arg(body, visit);
        }
        Expr::Iter { iter, body, .. } => {
            walk_arg(iter, visit);
            walk_arg(body, visit);
        }
        Expr::Deref { target } => walk_arg(target, visit),
        Expr::Try {
            body,
            catch_body,
            fallback,
            ..
        } => {
            walk_arg(body, visit);
            walk_arg(catch_body, visit);
            if let Some(fallback) = fallback {
                walk_arg(fallback, visit);
            }
        }
        Expr::Par { branches } => {
            for branch in branches {
                walk_arg(branch, visit);
            }
        }
        Expr::Spawn { task } => walk_arg(task, visit),
        Expr::Await {
            future,
            timeout,
            fallback,
            ..
        } => {
            walk_arg(future, visit);
            if let Some(timeout) = timeout {
                walk_arg(timeout, visit);
            }
            if let Some(fallback) = fallback {
                walk_arg(fallback, visit);
            }
        }
        Expr::Send { channel, value } => {
            walk_arg(channel, visit);
            walk_arg(value, visit);
        }
        Expr::Recv { channel } => walk_arg(channel, visit),
        Expr::Select {
            futures,
            timeout,
            fallback,
            ..
        } => {
            for future in futures {
                walk_arg(future, visit);
            }
            if let Some(timeout) = timeout {
                walk_arg(timeout, visit);
            }
            if let Some(fallback) = fallback {
                walk_arg(fallback, visit);
            }
        }
        Expr::Race { tasks } => {
            for task in tasks {
                walk_arg(task, visit);
            }
        }
    }
}
