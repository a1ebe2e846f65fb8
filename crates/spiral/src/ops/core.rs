//! `core:` arithmetic, comparison, and introspection operators.

use crate::{
    errors::{ErrorCode, RunError, RunResult},
    heap::Heap,
    ops::OperatorRegistry,
    value::Value,
};

pub(super) fn install(registry: &mut OperatorRegistry) {
    registry.define("core", "add").params(2).impl_fn(add).build();
    registry.define("core", "sub").params(2).impl_fn(sub).build();
    registry.define("core", "mul").params(2).impl_fn(mul).build();
    registry.define("core", "div").params(2).impl_fn(div).build();
    registry.define("core", "mod").params(2).impl_fn(rem).build();
    registry.define("core", "pow").params(2).impl_fn(pow).build();
    registry.define("core", "neg").params(1).impl_fn(neg).build();

    registry.define("core", "eq").params(2).impl_fn(eq).build();
    registry.define("core", "neq").params(2).impl_fn(neq).build();
    registry.define("core", "lt").params(2).impl_fn(lt).build();
    registry.define("core", "lte").params(2).impl_fn(lte).build();
    registry.define("core", "gt").params(2).impl_fn(gt).build();
    registry.define("core", "gte").params(2).impl_fn(gte).build();

    registry.define("core", "typeof").params(1).impl_fn(type_of).build();
}

/// Numeric operand pair: both ints, or widened to floats.
enum Numbers {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numbers(a: &Value, b: &Value, heap: &Heap, context: &str) -> RunResult<Numbers> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Numbers::Ints(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(Numbers::Floats(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(Numbers::Floats(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Numbers::Floats(*x, *y)),
        _ => Err(RunError::type_error(format!(
            "{context} expects numbers, got {} and {}",
            a.type_tag(heap),
            b.type_tag(heap)
        ))),
    }
}

fn overflow(context: &str) -> RunError {
    RunError::domain(format!("integer overflow in {context}"))
}

fn add(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:add")? {
        Numbers::Ints(x, y) => x.checked_add(y).map(Value::Int).ok_or_else(|| overflow("core:add")),
        Numbers::Floats(x, y) => Ok(Value::Float(x + y)),
    }
}

fn sub(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:sub")? {
        Numbers::Ints(x, y) => x.checked_sub(y).map(Value::Int).ok_or_else(|| overflow("core:sub")),
        Numbers::Floats(x, y) => Ok(Value::Float(x - y)),
    }
}

fn mul(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:mul")? {
        Numbers::Ints(x, y) => x.checked_mul(y).map(Value::Int).ok_or_else(|| overflow("core:mul")),
        Numbers::Floats(x, y) => Ok(Value::Float(x * y)),
    }
}

fn div(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:div")? {
        Numbers::Ints(_, 0) => Err(RunError::raise(ErrorCode::DivideByZero, "integer division by zero")),
        Numbers::Ints(x, y) => {
            // Evenly divisible pairs stay integral; otherwise widen.
            if x % y == 0 {
                x.checked_div(y).map(Value::Int).ok_or_else(|| overflow("core:div"))
            } else {
                Ok(Value::Float(x as f64 / y as f64))
            }
        }
        Numbers::Floats(x, y) => {
            if y == 0.0 {
                Err(RunError::raise(ErrorCode::DivideByZero, "float division by zero"))
            } else {
                Ok(Value::Float(x / y))
            }
        }
    }
}

fn rem(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:mod")? {
        Numbers::Ints(_, 0) => Err(RunError::raise(ErrorCode::DivideByZero, "modulo by zero")),
        Numbers::Ints(x, y) => x.checked_rem(y).map(Value::Int).ok_or_else(|| overflow("core:mod")),
        Numbers::Floats(x, y) => {
            if y == 0.0 {
                Err(RunError::raise(ErrorCode::DivideByZero, "modulo by zero"))
            } else {
                Ok(Value::Float(x % y))
            }
        }
    }
}

fn pow(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match numbers(&args[0], &args[1], heap, "core:pow")? {
        Numbers::Ints(x, y) => {
            if y >= 0 {
                let exp = u32::try_from(y).map_err(|_| overflow("core:pow"))?;
                x.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("core:pow"))
            } else {
                // Negative exponents leave the integers.
                Ok(Value::Float((x as f64).powi(y as i32)))
            }
        }
        Numbers::Floats(x, y) => Ok(Value::Float(x.powf(y))),
    }
}

fn neg(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    match &args[0] {
        Value::Int(x) => x.checked_neg().map(Value::Int).ok_or_else(|| overflow("core:neg")),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(RunError::type_error(format!(
            "core:neg expects number, got {}",
            other.type_tag(heap)
        ))),
    }
}

fn eq(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(args[0].structural_eq(&args[1], heap)))
}

fn neq(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(!args[0].structural_eq(&args[1], heap)))
}

/// Ordering over numbers and strings; everything else is a type error.
fn ordering(a: &Value, b: &Value, heap: &Heap, context: &str) -> RunResult<std::cmp::Ordering> {
    if let (Ok(sa), Ok(sb)) = (a.expect_str(heap, context), b.expect_str(heap, context)) {
        return Ok(sa.cmp(sb));
    }
    match numbers(a, b, heap, context)? {
        Numbers::Ints(x, y) => Ok(x.cmp(&y)),
        Numbers::Floats(x, y) => x
            .partial_cmp(&y)
            .ok_or_else(|| RunError::domain(format!("{context} cannot order NaN"))),
    }
}

fn lt(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(ordering(&args[0], &args[1], heap, "core:lt")?.is_lt()))
}

fn lte(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(ordering(&args[0], &args[1], heap, "core:lte")?.is_le()))
}

fn gt(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(ordering(&args[0], &args[1], heap, "core:gt")?.is_gt()))
}

fn gte(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    Ok(Value::Bool(ordering(&args[0], &args[1], heap, "core:gte")?.is_ge()))
}

fn type_of(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let tag = args[0].type_tag(heap);
    heap.alloc_str(tag.to_string())
}
