//! `set:` membership algebra.
//!
//! Sets dedup by the canonical encoding of each element, so structural
//! duplicates collapse regardless of where they were allocated. All
//! operators are pure: `add` and `remove` return new sets.

use crate::{
    errors::{RunError, RunResult},
    heap::{Heap, HeapData, SetValue},
    ops::OperatorRegistry,
    value::Value,
};

pub(super) fn install(registry: &mut OperatorRegistry) {
    registry.define("set", "union").params(2).impl_fn(union).build();
    registry.define("set", "intersect").params(2).impl_fn(intersect).build();
    registry.define("set", "difference").params(2).impl_fn(difference).build();
    registry.define("set", "contains").params(2).impl_fn(contains).build();
    registry.define("set", "subset").params(2).impl_fn(subset).build();
    registry.define("set", "add").params(2).impl_fn(add).build();
    registry.define("set", "remove").params(2).impl_fn(remove).build();
    registry.define("set", "size").params(1).impl_fn(size).build();
    registry.define("set", "toList").params(1).impl_fn(to_list).build();
}

fn expect_set<'h>(value: &Value, heap: &'h Heap, context: &str) -> RunResult<&'h SetValue> {
    if let Value::Ref(id) = value
        && let HeapData::Set(set) = heap.get(*id)
    {
        return Ok(set);
    }
    Err(RunError::type_error(format!(
        "{context} expects set, got {}",
        value.type_tag(heap)
    )))
}

fn union(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = expect_set(&args[0], heap, "set:union")?.clone();
    let b = expect_set(&args[1], heap, "set:union")?;
    let mut out = a;
    for (key, value) in b.iter() {
        out.insert(key.clone(), value.clone());
    }
    heap.alloc_set(out)
}

fn intersect(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = expect_set(&args[0], heap, "set:intersect")?;
    let b = expect_set(&args[1], heap, "set:intersect")?;
    let mut out = SetValue::new();
    for (key, value) in a.iter() {
        if b.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    heap.alloc_set(out)
}

fn difference(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = expect_set(&args[0], heap, "set:difference")?;
    let b = expect_set(&args[1], heap, "set:difference")?;
    let mut out = SetValue::new();
    for (key, value) in a.iter() {
        if !b.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    heap.alloc_set(out)
}

fn contains(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let key = args[1].canonical_key(heap)?;
    let set = expect_set(&args[0], heap, "set:contains")?;
    Ok(Value::Bool(set.contains_key(&key)))
}

fn subset(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = expect_set(&args[0], heap, "set:subset")?;
    let b = expect_set(&args[1], heap, "set:subset")?;
    Ok(Value::Bool(a.iter().all(|(key, _)| b.contains_key(key))))
}

fn add(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let key = args[1].canonical_key(heap)?;
    let mut out = expect_set(&args[0], heap, "set:add")?.clone();
    out.insert(key, args[1].clone());
    heap.alloc_set(out)
}

fn remove(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let key = args[1].canonical_key(heap)?;
    let mut out = expect_set(&args[0], heap, "set:remove")?.clone();
    out.remove(&key);
    heap.alloc_set(out)
}

fn size(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let set = expect_set(&args[0], heap, "set:size")?;
    Ok(Value::Int(set.len() as i64))
}

fn to_list(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let items: Vec<Value> = expect_set(&args[0], heap, "set:toList")?.values().cloned().collect();
    heap.alloc_list(items)
}
