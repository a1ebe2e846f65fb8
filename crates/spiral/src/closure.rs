//! Closure representation.
//!
//! A closure is a parameter list, a body reference, and the frame captured at
//! creation time. Bodies stay as [`Arg`] (node id or inline expression) so a
//! lambda can point at a sibling node whose meaning depends on the
//! application environment.

use serde::{Deserialize, Serialize};

use crate::{
    env::FrameId,
    expr::{Arg, Param},
};

/// A closure value: params, body reference, captured environment.
///
/// Closures capture the environment at their creation point; later mutations
/// to outer bindings do not affect captured ones. The captured `env` is a
/// frame id into the evaluation's frame arena; the `fix` construct relies on
/// this indirection to tie a closure's first parameter back to the closure
/// value itself without recursive owned pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Closure {
    pub params: Vec<Param>,
    pub body: Arg,
    pub env: FrameId,
}

impl Closure {
    pub fn new(params: Vec<Param>, body: Arg, env: FrameId) -> Self {
        Self { params, body, env }
    }

    /// Number of parameters a call must supply at minimum.
    pub fn min_arity(&self) -> usize {
        self.params.iter().filter(|p| p.is_required()).count()
    }

    /// Number of parameters a call may supply at maximum.
    pub fn max_arity(&self) -> usize {
        self.params.len()
    }
}
