//! Capture-avoiding substitution, free-variable collection, and fresh-name
//! generation over expression terms.
//!
//! The evaluators work with environments, not substitution, but the bound-node
//! pre-pass leans on free-variable collection, and the substitution and
//! α-renaming primitives are part of the engine's contract: substitution under
//! a binder never captures, and renaming a lambda's parameters preserves its
//! behavior on all inputs not mentioning the new names free.
//!
//! Bare string references ([`Arg::Ref`]) count as variable occurrences here;
//! callers that also use node ids subtract those from the result (the bound
//! set pre-pass does exactly that).

use ahash::AHashSet;

use crate::expr::{Arg, Expr, Param};

/// Fresh-name generator.
///
/// Generated names use a `$` separator, which documents cannot produce from
/// ordinary identifiers, so collisions with user names require deliberate
/// effort. An avoid-set guards against even those.
#[derive(Debug, Default)]
pub struct FreshNames {
    counter: u64,
}

impl FreshNames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces a name derived from `base` that is not in `avoid`.
    pub fn fresh(&mut self, base: &str, avoid: &AHashSet<String>) -> String {
        loop {
            self.counter += 1;
            let candidate = format!("{base}${}", self.counter);
            if !avoid.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Collects the free variables of an expression.
#[must_use]
pub fn free_vars(expr: &Expr) -> AHashSet<String> {
    let mut out = AHashSet::new();
    collect_free(expr, &mut AHashSet::new(), &mut out);
    out
}

fn collect_free_arg(arg: &Arg, bound: &mut AHashSet<String>, out: &mut AHashSet<String>) {
    match arg {
        Arg::Ref(name) => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        Arg::Inline(inner) => collect_free(inner, bound, out),
    }
}

/// Runs `body` with `names` temporarily added to the bound set.
fn with_bound<R>(bound: &mut AHashSet<String>, names: &[&str], body: impl FnOnce(&mut AHashSet<String>) -> R) -> R {
    let added: Vec<String> = names
        .iter()
        .filter(|name| bound.insert((**name).to_owned()))
        .map(|name| (*name).to_owned())
        .collect();
    let result = body(bound);
    for name in added {
        bound.remove(&name);
    }
    result
}

fn collect_free(expr: &Expr, bound: &mut AHashSet<String>, out: &mut AHashSet<String>) {
    match expr {
        Expr::Lit(_) | Expr::RefCell { .. } | Expr::Channel { .. } => {}
        Expr::Var { name } => {
            if !bound.contains(name) {
                out.insert(name.clone());
            }
        }
        Expr::Ref { id } => {
            if !bound.contains(id) {
                out.insert(id.clone());
            }
        }
        Expr::Call { args, .. } | Expr::AirRef { args, .. } | Expr::Effect { args, .. } => {
            for arg in args {
                collect_free_arg(arg, bound, out);
            }
        }
        Expr::CallExpr { func, args } => {
            collect_free_arg(func, bound, out);
            for arg in args {
                collect_free_arg(arg, bound, out);
            }
        }
        Expr::If { cond, then, otherwise } => {
            collect_free_arg(cond, bound, out);
            collect_free_arg(then, bound, out);
            collect_free_arg(otherwise, bound, out);
        }
        Expr::Let { name, value, body } => {
            collect_free_arg(value, bound, out);
            with_bound(bound, &[name], |bound| collect_free_arg(body, bound, out));
        }
        Expr::Lambda { params, body } => {
            for param in params {
                if let Some(default) = &param.default {
                    collect_free(default, bound, out);
                }
            }
            let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
            with_bound(bound, &names, |bound| collect_free_arg(body, bound, out));
        }
        Expr::Fix { func } => collect_free_arg(func, bound, out),
        Expr::Do { exprs } => {
            for item in exprs {
                collect_free_arg(item, bound, out);
            }
        }
        Expr::Predicate { value, .. } => collect_free_arg(value, bound, out),
        Expr::Seq { first, then } => {
            collect_free_arg(first, bound, out);
            collect_free_arg(then, bound, out);
        }
        Expr::Assign { value, .. } => collect_free_arg(value, bound, out),
        Expr::While { cond, body } => {
            collect_free_arg(cond, bound, out);
            collect_free_arg(body, bound, out);
        }
        Expr::For {
            var,
            init,
            cond,
            update,
            body,
        } => {
            collect_free_arg(init, bound, out);
            with_bound(bound, &[var], |bound| {
                collect_free_arg(cond, bound, out);
                collect_free_arg(update, bound, out);
                collect_free_arg(body, bound, out);
            });
        }
        Expr::Iter { var, iter, body } => {
            collect_free_arg(iter, bound, out);
            with_bound(bound, &[var], |bound| collect_free_arg(body, bound, out));
        }
        Expr::Deref { target } => collect_free_arg(target, bound, out),
        Expr::Try {
            body,
            catch_param,
            catch_body,
            fallback,
        } => {
            collect_free_arg(body, bound, out);
            with_bound(bound, &[catch_param], |bound| {
                collect_free_arg(catch_body, bound, out);
            });
            if let Some(fallback) = fallback {
                collect_free_arg(fallback, bound, out);
            }
        }
        Expr::Par { branches } => {
            for branch in branches {
                collect_free_arg(branch, bound, out);
            }
        }
        Expr::Spawn { task } => collect_free_arg(task, bound, out),
        Expr::Await {
            future,
            timeout,
            fallback,
            ..
        } => {
            collect_free_arg(future, bound, out);
            if let Some(timeout) = timeout {
                collect_free_arg(timeout, bound, out);
            }
            if let Some(fallback) = fallback {
                collect_free_arg(fallback, bound, out);
            }
        }
        Expr::Send { channel, value } => {
            collect_free_arg(channel, bound, out);
            collect_free_arg(value, bound, out);
        }
        Expr::Recv { channel } => collect_free_arg(channel, bound, out),
        Expr::Select {
            futures,
            timeout,
            fallback,
            ..
        } => {
            for future in futures {
                collect_free_arg(future, bound, out);
            }
            if let Some(timeout) = timeout {
                collect_free_arg(timeout, bound, out);
            }
            if let Some(fallback) = fallback {
                collect_free_arg(fallback, bound, out);
            }
        }
        Expr::Race { tasks } => {
            for task in tasks {
                collect_free_arg(task, bound, out);
            }
        }
    }
}

/// Substitutes `replacement` for free occurrences of `name` in `expr`.
///
/// Capture-avoiding: descending under a binder whose bound name occurs free
/// in `replacement` first α-renames the binder to a fresh name. Substituting
/// a name that a lambda itself binds is the identity on that lambda.
#[must_use]
pub fn substitute(expr: &Expr, name: &str, replacement: &Expr) -> Expr {
    let mut fresh = FreshNames::new();
    let replacement_fv = free_vars(replacement);
    subst_expr(expr, name, replacement, &replacement_fv, &mut fresh)
}

/// Renames a lambda's parameters from `old` to `new`, rewriting occurrences
/// in the body. Non-lambda expressions and mismatched name lists are returned
/// unchanged.
#[must_use]
pub fn alpha_rename(expr: &Expr, old: &[&str], new: &[&str]) -> Expr {
    let Expr::Lambda { params, body } = expr else {
        return expr.clone();
    };
    if old.len() != new.len() {
        return expr.clone();
    }
    let mut params = params.clone();
    let mut body = body.clone();
    for (old_name, new_name) in old.iter().zip(new.iter()) {
        for param in &mut params {
            if param.name == *old_name {
                param.name = (*new_name).to_owned();
            }
        }
        let renamed = Expr::Var {
            name: (*new_name).to_owned(),
        };
        body = subst_arg_free(&body, old_name, &renamed);
    }
    Expr::Lambda { params, body }
}

/// Substitutes into an argument slot without binder bookkeeping (used by
/// α-renaming where the binder is being renamed away).
fn subst_arg_free(arg: &Arg, name: &str, replacement: &Expr) -> Arg {
    let mut fresh = FreshNames::new();
    let replacement_fv = free_vars(replacement);
    subst_arg(arg, name, replacement, &replacement_fv, &mut fresh)
}

fn subst_arg(arg: &Arg, name: &str, replacement: &Expr, replacement_fv: &AHashSet<String>, fresh: &mut FreshNames) -> Arg {
    match arg {
        Arg::Ref(id) if id == name => Arg::Inline(Box::new(replacement.clone())),
        Arg::Ref(id) => Arg::Ref(id.clone()),
        Arg::Inline(inner) => Arg::Inline(Box::new(subst_expr(inner, name, replacement, replacement_fv, fresh))),
    }
}

/// Rewrites a binder so substitution can descend without capture.
///
/// Returns the fresh binder name and the scoped slots with the old name
/// renamed to it.
fn freshen_binder(
    binder: &str,
    scoped: &[&Arg],
    replacement_fv: &AHashSet<String>,
    fresh: &mut FreshNames,
) -> (String, Vec<Arg>) {
    let mut avoid: AHashSet<String> = replacement_fv.clone();
    for arg in scoped {
        if let Arg::Inline(inner) = arg {
            avoid.extend(free_vars(inner));
        }
    }
    let new_name = fresh.fresh(binder, &avoid);
    let renamed = Expr::Var { name: new_name.clone() };
    let rewritten = scoped.iter().map(|arg| subst_arg_free(arg, binder, &renamed)).collect();
    (new_name, rewritten)
}

fn subst_expr(expr: &Expr, name: &str, replacement: &Expr, replacement_fv: &AHashSet<String>, fresh: &mut FreshNames) -> Expr {
    let sub = |arg: &Arg, fresh: &mut FreshNames| subst_arg(arg, name, replacement, replacement_fv, fresh);
    match expr {
        Expr::Lit(_) | Expr::RefCell { .. } | Expr::Channel { .. } => expr.clone(),
        Expr::Var { name: var_name } => {
            if var_name == name {
                replacement.clone()
            } else {
                expr.clone()
            }
        }
        Expr::Ref { id } => {
            if id == name {
                replacement.clone()
            } else {
                expr.clone()
            }
        }
        Expr::Call { ns, name: op, args } => Expr::Call {
            ns: ns.clone(),
            name: op.clone(),
            args: args.iter().map(|arg| sub(arg, fresh)).collect(),
        },
        Expr::AirRef { ns, name: op, args } => Expr::AirRef {
            ns: ns.clone(),
            name: op.clone(),
            args: args.iter().map(|arg| sub(arg, fresh)).collect(),
        },
        Expr::Effect { op, args } => Expr::Effect {
            op: op.clone(),
            args: args.iter().map(|arg| sub(arg, fresh)).collect(),
        },
        Expr::CallExpr { func, args } => Expr::CallExpr {
            func: sub(func, fresh),
            args: args.iter().map(|arg| sub(arg, fresh)).collect(),
        },
        Expr::If { cond, then, otherwise } => Expr::If {
            cond: sub(cond, fresh),
            then: sub(then, fresh),
            otherwise: sub(otherwise, fresh),
        },
        Expr::Let {
            name: binder,
            value,
            body,
        } => {
            let value = sub(value, fresh);
            if binder == name {
                // The let shadows the substituted name; the body is untouched.
                Expr::Let {
                    name: binder.clone(),
                    value,
                    body: body.clone(),
                }
            } else if replacement_fv.contains(binder) {
                let (new_name, mut rewritten) = freshen_binder(binder, &[body], replacement_fv, fresh);
                let body = rewritten.pop().expect("one scoped slot");
                Expr::Let {
                    name: new_name,
                    value,
                    body: sub(&body, fresh),
                }
            } else {
                Expr::Let {
                    name: binder.clone(),
                    value,
                    body: sub(body, fresh),
                }
            }
        }
        Expr::Lambda { params, body } => {
            let params: Vec<Param> = params
                .iter()
                .map(|param| {
                    let mut param = param.clone();
                    param.default = param
                        .default
                        .map(|default| subst_expr(&default, name, replacement, replacement_fv, fresh));
                    param
                })
                .collect();
            if params.iter().any(|p| p.name == name) {
                // `name` is a parameter: the body only ever sees the bound
                // occurrence, so the lambda is unchanged.
                return Expr::Lambda {
                    params,
                    body: body.clone(),
                };
            }
            let capturing: Vec<&Param> = params.iter().filter(|p| replacement_fv.contains(&p.name)).collect();
            if capturing.is_empty() {
                Expr::Lambda {
                    params,
                    body: sub(body, fresh),
                }
            } else {
                let old: Vec<String> = capturing.iter().map(|p| p.name.clone()).collect();
                let mut avoid = replacement_fv.clone();
                if let Arg::Inline(inner) = body {
                    avoid.extend(free_vars(inner));
                }
                let new: Vec<String> = old.iter().map(|o| fresh.fresh(o, &avoid)).collect();
                let lambda = Expr::Lambda {
                    params,
                    body: body.clone(),
                };
                let old_refs: Vec<&str> = old.iter().map(String::as_str).collect();
                let new_refs: Vec<&str> = new.iter().map(String::as_str).collect();
                let renamed = alpha_rename(&lambda, &old_refs, &new_refs);
                match renamed {
                    Expr::Lambda { params, body } => Expr::Lambda {
                        params,
                        body: sub(&body, fresh),
                    },
                    other => other,
                }
            }
        }
        Expr::Fix { func } => Expr::Fix { func: sub(func, fresh) },
        Expr::Do { exprs } => Expr::Do {
            exprs: exprs.iter().map(|item| sub(item, fresh)).collect(),
        },
        Expr::Predicate { name: pred, value } => Expr::Predicate {
            name: pred.clone(),
            value: sub(value, fresh),
        },
        Expr::Seq { first, then } => Expr::Seq {
            first: sub(first, fresh),
            then: sub(then, fresh),
        },
        Expr::Assign { target, value } => Expr::Assign {
            target: target.clone(),
            value: sub(value, fresh),
        },
        Expr::While { cond, body } => Expr::While {
            cond: sub(cond, fresh),
            body: sub(body, fresh),
        },
        Expr::For {
            var,
            init,
            cond,
            update,
            body,
        } => {
            let init = sub(init, fresh);
            if var == name {
                Expr::For {
                    var: var.clone(),
                    init,
                    cond: cond.clone(),
                    update: update.clone(),
                    body: body.clone(),
                }
            } else if replacement_fv.contains(var) {
                let (new_name, mut rewritten) = freshen_binder(var, &[cond, update, body], replacement_fv, fresh);
                let body_arg = rewritten.pop().expect("three scoped slots");
                let update_arg = rewritten.pop().expect("three scoped slots");
                let cond_arg = rewritten.pop().expect("three scoped slots");
                Expr::For {
                    var: new_name,
                    init,
                    cond: sub(&cond_arg, fresh),
                    update: sub(&update_arg, fresh),
                    body: sub(&body_arg, fresh),
                }
            } else {
                Expr::For {
                    var: var.clone(),
                    init,
                    cond: sub(cond, fresh),
                    update: sub(update, fresh),
                    body: sub(body, fresh),
                }
            }
        }
        Expr::Iter { var, iter, body } => {
            let iter = sub(iter, fresh);
            if var == name {
                Expr::Iter {
                    var: var.clone(),
                    iter,
                    body: body.clone(),
                }
            } else if replacement_fv.contains(var) {
                let (new_name, mut rewritten) = freshen_binder(var, &[body], replacement_fv, fresh);
                let body = rewritten.pop().expect("one scoped slot");
                Expr::Iter {
                    var: new_name,
                    iter,
                    body: sub(&body, fresh),
                }
            } else {
                Expr::Iter {
                    var: var.clone(),
                    iter,
                    body: sub(body, fresh),
                }
            }
        }
        Expr::Deref { target } => Expr::Deref { target: sub(target, fresh) },
        Expr::Try {
            body,
            catch_param,
            catch_body,
            fallback,
        } => {
            let tried = sub(body, fresh);
            let fallback = fallback.as_ref().map(|f| sub(f, fresh));
            if catch_param == name {
                Expr::Try {
                    body: tried,
                    catch_param: catch_param.clone(),
                    catch_body: catch_body.clone(),
                    fallback,
                }
            } else if replacement_fv.contains(catch_param) {
                let (new_name, mut rewritten) = freshen_binder(catch_param, &[catch_body], replacement_fv, fresh);
                let catch_body = rewritten.pop().expect("one scoped slot");
                Expr::Try {
                    body: tried,
                    catch_param: new_name,
                    catch_body: sub(&catch_body, fresh),
                    fallback,
                }
            } else {
                Expr::Try {
                    body: tried,
                    catch_param: catch_param.clone(),
                    catch_body: sub(catch_body, fresh),
                    fallback,
                }
            }
        }
        Expr::Par { branches } => Expr::Par {
            branches: branches.iter().map(|b| sub(b, fresh)).collect(),
        },
        Expr::Spawn { task } => Expr::Spawn { task: sub(task, fresh) },
        Expr::Await {
            future,
            timeout,
            fallback,
            return_index,
        } => Expr::Await {
            future: sub(future, fresh),
            timeout: timeout.as_ref().map(|t| sub(t, fresh)),
            fallback: fallback.as_ref().map(|f| sub(f, fresh)),
            return_index: *return_index,
        },
        Expr::Send { channel, value } => Expr::Send {
            channel: sub(channel, fresh),
            value: sub(value, fresh),
        },
        Expr::Recv { channel } => Expr::Recv { channel: sub(channel, fresh) },
        Expr::Select {
            futures,
            timeout,
            fallback,
            return_index,
        } => Expr::Select {
            futures: futures.iter().map(|f| sub(f, fresh)).collect(),
            timeout: timeout.as_ref().map(|t| sub(t, fresh)),
            fallback: fallback.as_ref().map(|f| sub(f, fresh)),
            return_index: *return_index,
        },
        Expr::Race { tasks } => Expr::Race {
            tasks: tasks.iter().map(|t| sub(t, fresh)).collect(),
        },
    }
}
