//! `bool:` strict boolean connectives.
//!
//! These are eager operators over already-evaluated operands; short-circuit
//! control flow belongs to `if`.

use crate::{errors::RunResult, heap::Heap, ops::OperatorRegistry, value::Value};

pub(super) fn install(registry: &mut OperatorRegistry) {
    registry.define("bool", "and").params(2).impl_fn(and).build();
    registry.define("bool", "or").params(2).impl_fn(or).build();
    registry.define("bool", "not").params(1).impl_fn(not).build();
}

fn and(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = args[0].expect_bool(heap, "bool:and")?;
    let b = args[1].expect_bool(heap, "bool:and")?;
    Ok(Value::Bool(a && b))
}

fn or(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = args[0].expect_bool(heap, "bool:or")?;
    let b = args[1].expect_bool(heap, "bool:or")?;
    Ok(Value::Bool(a || b))
}

fn not(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = args[0].expect_bool(heap, "bool:not")?;
    Ok(Value::Bool(!a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ErrorCode, limits::EvalLimits};

    #[test]
    fn connectives_are_strict() {
        let registry = OperatorRegistry::standard();
        let mut heap = Heap::new(&EvalLimits::default());
        assert_eq!(
            registry
                .apply("bool", "and", &[Value::Bool(true), Value::Bool(false)], &mut heap)
                .unwrap(),
            Value::Bool(false)
        );
        let err = registry
            .apply("bool", "not", &[Value::Int(1)], &mut heap)
            .unwrap_err();
        assert_eq!(err.error_value().code, ErrorCode::TypeError);
    }
}
