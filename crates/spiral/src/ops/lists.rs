//! `list:` ordered-sequence operators.

use crate::{
    errors::{ErrorCode, RunError, RunResult},
    heap::Heap,
    ops::OperatorRegistry,
    value::Value,
};

pub(super) fn install(registry: &mut OperatorRegistry) {
    registry.define("list", "length").params(1).impl_fn(length).build();
    registry.define("list", "concat").params(2).impl_fn(concat).build();
    registry.define("list", "nth").params(2).impl_fn(nth).build();
    registry.define("list", "reverse").params(1).impl_fn(reverse).build();
}

fn length(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let items = args[0].expect_list(heap, "list:length")?;
    Ok(Value::Int(items.len() as i64))
}

fn concat(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let first = args[0].expect_list(heap, "list:concat")?;
    let second = args[1].expect_list(heap, "list:concat")?;
    let mut joined = Vec::with_capacity(first.len() + second.len());
    joined.extend_from_slice(first);
    joined.extend_from_slice(second);
    heap.alloc_list(joined)
}

fn nth(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let items = args[0].expect_list(heap, "list:nth")?;
    let index = args[1].expect_int(heap, "list:nth")?;
    if index < 0 || index as usize >= items.len() {
        return Err(RunError::raise(ErrorCode::DomainError, "Index out of bounds"));
    }
    Ok(items[index as usize].clone())
}

fn reverse(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let mut items = args[0].expect_list(heap, "list:reverse")?.to_vec();
    items.reverse();
    heap.alloc_list(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::EvalLimits;

    #[test]
    fn nth_bounds_are_domain_errors() {
        let registry = OperatorRegistry::standard();
        let mut heap = Heap::new(&EvalLimits::default());
        let list = heap.alloc_list(vec![Value::Int(10), Value::Int(20)]).unwrap();
        assert_eq!(
            registry
                .apply("list", "nth", &[list.clone(), Value::Int(1)], &mut heap)
                .unwrap(),
            Value::Int(20)
        );
        for bad in [-1, 2] {
            let err = registry
                .apply("list", "nth", &[list.clone(), Value::Int(bad)], &mut heap)
                .unwrap_err();
            assert_eq!(err.error_value().code, ErrorCode::DomainError);
            assert_eq!(err.error_value().message.as_deref(), Some("Index out of bounds"));
        }
    }

    #[test]
    fn concat_and_reverse_produce_new_lists() {
        let registry = OperatorRegistry::standard();
        let mut heap = Heap::new(&EvalLimits::default());
        let a = heap.alloc_list(vec![Value::Int(1)]).unwrap();
        let b = heap.alloc_list(vec![Value::Int(2)]).unwrap();
        let joined = registry.apply("list", "concat", &[a.clone(), b], &mut heap).unwrap();
        let reversed = registry.apply("list", "reverse", &[joined], &mut heap).unwrap();
        let items = reversed.expect_list(&heap, "test").unwrap();
        assert_eq!(items, &[Value::Int(2), Value::Int(1)]);
        // The source list is untouched.
        assert_eq!(a.expect_list(&heap, "test").unwrap().len(), 1);
    }
}
