//! The operator registry.
//!
//! Operators are namespaced pure functions over values, keyed `ns:name`.
//! The registry is built once through [`OpBuilder`] and is read-only during
//! evaluation. Application enforces arity, and any panic escaping a
//! host-native implementation is caught and wrapped as a `DomainError`.
//!
//! # Module Structure
//!
//! - `core` - arithmetic, comparison, `typeof`
//! - `boolean` - strict boolean connectives
//! - `strings` - text operations (char-based indexing)
//! - `lists` - ordered-sequence operations
//! - `sets` - membership algebra over canonical-keyed sets

mod boolean;
mod core;
mod lists;
mod sets;
mod strings;

use std::panic::{AssertUnwindSafe, catch_unwind};

use ahash::AHashMap;

use crate::{
    errors::{ErrorCode, RunError, RunResult},
    heap::Heap,
    value::Value,
};

/// Implementation signature for operators: evaluated arguments in, value out.
pub type OpFn = fn(&[Value], &mut Heap) -> RunResult<Value>;

/// One registered operator.
#[derive(Debug, Clone, Copy)]
pub struct Operator {
    min_arity: usize,
    /// `None` means variadic above `min_arity`.
    max_arity: Option<usize>,
    pure: bool,
    func: OpFn,
}

impl Operator {
    /// Whether this operator is free of observable side effects.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.pure
    }
}

/// Builder for one operator definition.
///
/// Construction is a one-time pipeline:
/// `registry.define("core", "add").params(2).impl_fn(add).build()`.
#[must_use = "call .build() to install the operator"]
pub struct OpBuilder<'r> {
    registry: &'r mut OperatorRegistry,
    key: String,
    min_arity: usize,
    max_arity: Option<usize>,
    pure: bool,
    func: Option<OpFn>,
}

impl OpBuilder<'_> {
    /// Fixed arity: exactly `count` arguments.
    pub fn params(mut self, count: usize) -> Self {
        self.min_arity = count;
        self.max_arity = Some(count);
        self
    }

    /// Arity range: at least `min`, at most `max` arguments.
    pub fn params_between(mut self, min: usize, max: usize) -> Self {
        self.min_arity = min;
        self.max_arity = Some(max);
        self
    }

    /// Marks the operator impure (default is pure).
    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    /// Sets the implementation.
    pub fn impl_fn(mut self, func: OpFn) -> Self {
        self.func = Some(func);
        self
    }

    /// Installs the operator into the registry.
    ///
    /// # Panics
    /// Panics if no implementation was provided; registry construction is a
    /// build-time pipeline, so this is a programming error, not a runtime one.
    pub fn build(self) {
        let func = self.func.expect("operator built without an implementation");
        self.registry.ops.insert(
            self.key,
            Operator {
                min_arity: self.min_arity,
                max_arity: self.max_arity,
                pure: self.pure,
                func,
            },
        );
    }
}

/// Namespaced operator table, read-only during evaluation.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    ops: AHashMap<String, Operator>,
}

impl OperatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry populated with the built-in operator set.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        core::install(&mut registry);
        boolean::install(&mut registry);
        strings::install(&mut registry);
        lists::install(&mut registry);
        sets::install(&mut registry);
        registry
    }

    /// Starts defining an operator under `ns:name`.
    pub fn define(&mut self, ns: &str, name: &str) -> OpBuilder<'_> {
        OpBuilder {
            registry: self,
            key: format!("{ns}:{name}"),
            min_arity: 0,
            max_arity: Some(0),
            pure: true,
            func: None,
        }
    }

    /// Looks up an operator by namespace and name.
    #[must_use]
    pub fn get(&self, ns: &str, name: &str) -> Option<&Operator> {
        self.ops.get(&format!("{ns}:{name}"))
    }

    /// Number of registered operators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies `ns:name` to evaluated arguments.
    ///
    /// Fails with `UnknownOperator` when the key is absent, `ArityError` when
    /// the argument count is out of range, and wraps panics escaping the
    /// implementation as `DomainError`.
    pub fn apply(&self, ns: &str, name: &str, args: &[Value], heap: &mut Heap) -> RunResult<Value> {
        let Some(op) = self.get(ns, name) else {
            return Err(RunError::raise(
                ErrorCode::UnknownOperator,
                format!("unknown operator '{ns}:{name}'"),
            ));
        };
        if args.len() < op.min_arity || op.max_arity.is_some_and(|max| args.len() > max) {
            let expected = match op.max_arity {
                Some(max) if max == op.min_arity => format!("{max}"),
                Some(max) => format!("{}..{max}", op.min_arity),
                None => format!("{}+", op.min_arity),
            };
            return Err(RunError::raise(
                ErrorCode::ArityError,
                format!("'{ns}:{name}' expects {expected} arguments, got {}", args.len()),
            ));
        }
        let func = op.func;
        match catch_unwind(AssertUnwindSafe(|| func(args, heap))) {
            Ok(result) => result,
            Err(_) => Err(RunError::raise(
                ErrorCode::DomainError,
                format!("operator '{ns}:{name}' panicked"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EvalLimits;

    #[test]
    fn standard_registry_contains_required_set() {
        let registry = OperatorRegistry::standard();
        for (ns, name) in [
            ("core", "add"),
            ("core", "typeof"),
            ("bool", "and"),
            ("string", "substring"),
            ("list", "nth"),
            ("set", "toList"),
        ] {
            assert!(registry.get(ns, name).is_some(), "missing {ns}:{name}");
        }
    }

    #[test]
    fn unknown_operator_and_arity_errors() {
        let registry = OperatorRegistry::standard();
        let mut heap = Heap::new(&EvalLimits::default());
        let err = registry.apply("core", "nope", &[], &mut heap).unwrap_err();
        assert_eq!(err.error_value().code, ErrorCode::UnknownOperator);

        let err = registry.apply("core", "add", &[Value::Int(1)], &mut heap).unwrap_err();
        assert_eq!(err.error_value().code, ErrorCode::ArityError);
    }

    #[test]
    fn panicking_operator_becomes_domain_error() {
        fn boom(_: &[Value], _: &mut Heap) -> RunResult<Value> {
            panic!("host bug")
        }
        let mut registry = OperatorRegistry::new();
        registry.define("host", "boom").params(0).impl_fn(boom).build();
        let mut heap = Heap::new(&EvalLimits::default());
        let err = registry.apply("host", "boom", &[], &mut heap).unwrap_err();
        assert_eq!(err.error_value().code, ErrorCode::DomainError);
    }
}
