//! The expression union shared by AIR, CIR, EIR, and PIR documents.
//!
//! Expressions are a flat tagged sum (~30 kinds) with per-kind payloads,
//! dispatched by `match` in the evaluators. Every argument slot is an
//! [`Arg`]: either the id of a sibling node (or a lexically bound name) or an
//! inline expression term.

use serde::{Deserialize, Serialize};

use crate::types::{Type, TypeTag};

/// A node-id-or-inline-expression slot.
///
/// A bare string is resolved dynamically: first against the document's node
/// ids, then against the lexical environment. Anything else must be an
/// embedded expression object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    /// Reference by node id or lexical name.
    Ref(String),
    /// Embedded expression.
    Inline(Box<Expr>),
}

impl Arg {
    /// Convenience constructor for an inline expression.
    #[must_use]
    pub fn inline(expr: Expr) -> Self {
        Self::Inline(Box::new(expr))
    }
}

impl From<&str> for Arg {
    fn from(id: &str) -> Self {
        Self::Ref(id.to_owned())
    }
}

/// A closure or airDef parameter: a name, an optional declared type, an
/// optional default expression, and a required/optional flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl Param {
    /// A bare required parameter with no declared type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            default: None,
            required: None,
        }
    }

    /// Whether a call must supply this parameter.
    ///
    /// An explicit `required` flag wins; otherwise a parameter with a default
    /// is optional and one without is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }
}

/// A literal: a declared type tag plus a JSON-shaped payload.
///
/// The payload is converted to a runtime value at evaluation time according
/// to the tag (ints stay ints, lists recurse, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Literal {
    #[serde(rename = "type")]
    pub ty: TypeTag,
    pub value: serde_json::Value,
}

/// An expression term.
///
/// Kinds group into layers: `Lit`..`Predicate` are AIR/CIR (pure), `Seq`..
/// `Try` are EIR (imperative), `Par`..`Race` are PIR (concurrent). The
/// evaluators reject kinds above their layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expr {
    // --- AIR/CIR: pure expressions ---
    /// Literal value with a declared type tag.
    Lit(Literal),
    /// Lexical variable lookup.
    Var { name: String },
    /// Evaluate another node by id, memoizing at top level.
    Ref { id: String },
    /// Apply a registry operator `ns:name` to evaluated arguments.
    Call {
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Apply a closure-valued expression to evaluated arguments.
    CallExpr {
        #[serde(rename = "fn")]
        func: Arg,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Conditional; the condition must be a boolean and exactly one branch
    /// is evaluated.
    If {
        cond: Arg,
        then: Arg,
        #[serde(rename = "else")]
        otherwise: Arg,
    },
    /// Bind `name` to `value` while evaluating `body`.
    Let { name: String, value: Arg, body: Arg },
    /// Construct a closure capturing the current environment.
    Lambda { params: Vec<Param>, body: Arg },
    /// Fixed point: ties a closure's first parameter back to the closure
    /// itself, enabling direct recursion.
    Fix {
        #[serde(rename = "fn")]
        func: Arg,
    },
    /// Evaluate each expression in order; the value is the last one's.
    Do {
        #[serde(default)]
        exprs: Vec<Arg>,
    },
    /// Like `Call` but the target may resolve to an airDef closure.
    AirRef {
        ns: String,
        name: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Named boolean check over a value.
    Predicate { name: String, value: Arg },

    // --- EIR: imperative extensions ---
    /// Evaluate `first` for effect, return `then`.
    Seq { first: Arg, then: Arg },
    /// Write into the ref-cell named `target`, creating it on first write.
    Assign { target: String, value: Arg },
    /// Loop while `cond` is true, bounded by the loop safety cap.
    While { cond: Arg, body: Arg },
    /// C-style loop: init once, then cond/body/update per iteration.
    For {
        var: String,
        init: Arg,
        cond: Arg,
        update: Arg,
        body: Arg,
    },
    /// Iterate a list, binding `var` to each element.
    Iter { var: String, iter: Arg, body: Arg },
    /// Dispatch a named side-effecting operation.
    Effect {
        op: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
    /// Read the ref-cell named `target` (a void-holding cell if absent).
    RefCell { target: String },
    /// Unwrap a ref value to its inner value.
    Deref { target: Arg },
    /// Evaluate `body`; on error bind it to `catchParam` and evaluate
    /// `catchBody`; otherwise return `fallback` when present.
    Try {
        #[serde(rename = "try")]
        body: Arg,
        #[serde(rename = "catchParam")]
        catch_param: String,
        #[serde(rename = "catchBody")]
        catch_body: Arg,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Arg>,
    },

    // --- PIR: concurrency extensions ---
    /// Evaluate all branches (concurrently outside sequential mode); the
    /// value is a list in branch order.
    Par { branches: Vec<Arg> },
    /// Start a task evaluating `task` under a snapshot of the current
    /// environment; the value is a pending future.
    Spawn { task: Arg },
    /// Wait for a future, optionally racing a timeout with a fallback.
    Await {
        future: Arg,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<Arg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Arg>,
        #[serde(rename = "returnIndex", default)]
        return_index: bool,
    },
    /// Allocate a bounded channel; buffer size defaults to 0 (rendezvous).
    Channel {
        #[serde(rename = "channelType", default, skip_serializing_if = "Option::is_none")]
        channel_type: Option<Type>,
        #[serde(rename = "bufferSize", default, skip_serializing_if = "Option::is_none")]
        buffer_size: Option<Arg>,
    },
    /// Send a value into a channel, suspending when the buffer is full.
    Send { channel: Arg, value: Arg },
    /// Receive from a channel, suspending when the buffer is empty.
    Recv { channel: Arg },
    /// Race several futures; the first to produce wins.
    Select {
        futures: Vec<Arg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<Arg>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Arg>,
        #[serde(rename = "returnIndex", default)]
        return_index: bool,
    },
    /// Spawn each task and return the first result.
    Race { tasks: Vec<Arg> },
}

impl Expr {
    /// True for the PIR-only kinds that require the `async` capability.
    #[must_use]
    pub fn is_concurrent(&self) -> bool {
        matches!(
            self,
            Self::Par { .. }
                | Self::Spawn { .. }
                | Self::Await { .. }
                | Self::Channel { .. }
                | Self::Send { .. }
                | Self::Recv { .. }
                | Self::Select { .. }
                | Self::Race { .. }
        )
    }

    /// True for the EIR-only imperative kinds.
    #[must_use]
    pub fn is_imperative(&self) -> bool {
        matches!(
            self,
            Self::Seq { .. }
                | Self::Assign { .. }
                | Self::While { .. }
                | Self::For { .. }
                | Self::Iter { .. }
                | Self::Effect { .. }
                | Self::RefCell { .. }
                | Self::Deref { .. }
                | Self::Try { .. }
        )
    }
}
