//! `string:` text operators.
//!
//! Indexing is by Unicode character, not byte. Out-of-range reads follow the
//! source semantics: `charAt` yields the empty string, `slice` and
//! `substring` clamp, `indexOf` yields `-1`.

use crate::{
    errors::{RunError, RunResult},
    heap::Heap,
    ops::OperatorRegistry,
    value::Value,
};

pub(super) fn install(registry: &mut OperatorRegistry) {
    registry.define("string", "concat").params(2).impl_fn(concat).build();
    registry.define("string", "length").params(1).impl_fn(length).build();
    registry.define("string", "slice").params_between(2, 3).impl_fn(slice).build();
    registry.define("string", "indexOf").params(2).impl_fn(index_of).build();
    registry.define("string", "toUpper").params(1).impl_fn(to_upper).build();
    registry.define("string", "toLower").params(1).impl_fn(to_lower).build();
    registry.define("string", "trim").params(1).impl_fn(trim).build();
    registry.define("string", "split").params(2).impl_fn(split).build();
    registry.define("string", "includes").params(2).impl_fn(includes).build();
    registry.define("string", "replace").params(3).impl_fn(replace).build();
    registry.define("string", "charAt").params(2).impl_fn(char_at).build();
    registry
        .define("string", "substring")
        .params_between(2, 3)
        .impl_fn(substring)
        .build();
}

/// Resolves a possibly-negative index against `len`, clamping into range.
fn clamp_index(index: i64, len: usize) -> usize {
    if index < 0 {
        let from_end = len as i64 + index;
        usize::try_from(from_end.max(0)).unwrap_or(0)
    } else {
        (index as usize).min(len)
    }
}

fn concat(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let a = args[0].expect_str(heap, "string:concat")?;
    let b = args[1].expect_str(heap, "string:concat")?;
    let joined = format!("{a}{b}");
    heap.alloc_str(joined)
}

fn length(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:length")?;
    let count = i64::try_from(s.chars().count()).map_err(|_| RunError::domain("string length overflow"))?;
    Ok(Value::Int(count))
}

fn slice(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:slice")?;
    let chars: Vec<char> = s.chars().collect();
    let start = clamp_index(args[1].expect_int(heap, "string:slice")?, chars.len());
    let end = match args.get(2) {
        Some(arg) => clamp_index(arg.expect_int(heap, "string:slice")?, chars.len()),
        None => chars.len(),
    };
    let out: String = if start < end { chars[start..end].iter().collect() } else { String::new() };
    heap.alloc_str(out)
}

fn index_of(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let haystack = args[0].expect_str(heap, "string:indexOf")?;
    let needle = args[1].expect_str(heap, "string:indexOf")?;
    match haystack.find(needle) {
        // Byte offset back to char offset.
        Some(byte_pos) => Ok(Value::Int(haystack[..byte_pos].chars().count() as i64)),
        None => Ok(Value::Int(-1)),
    }
}

fn to_upper(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:toUpper")?.to_uppercase();
    heap.alloc_str(s)
}

fn to_lower(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:toLower")?.to_lowercase();
    heap.alloc_str(s)
}

fn trim(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:trim")?.trim().to_owned();
    heap.alloc_str(s)
}

fn split(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:split")?.to_owned();
    let sep = args[1].expect_str(heap, "string:split")?.to_owned();
    let parts: Vec<String> = if sep.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(&sep).map(str::to_owned).collect()
    };
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        items.push(heap.alloc_str(part)?);
    }
    heap.alloc_list(items)
}

fn includes(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let haystack = args[0].expect_str(heap, "string:includes")?;
    let needle = args[1].expect_str(heap, "string:includes")?;
    Ok(Value::Bool(haystack.contains(needle)))
}

fn replace(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:replace")?;
    let from = args[1].expect_str(heap, "string:replace")?;
    let to = args[2].expect_str(heap, "string:replace")?;
    let out = if from.is_empty() {
        s.to_owned()
    } else {
        s.replace(from, to)
    };
    heap.alloc_str(out)
}

fn char_at(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:charAt")?;
    let index = args[1].expect_int(heap, "string:charAt")?;
    let out = if index < 0 {
        String::new()
    } else {
        s.chars().nth(index as usize).map(String::from).unwrap_or_default()
    };
    heap.alloc_str(out)
}

fn substring(args: &[Value], heap: &mut Heap) -> RunResult<Value> {
    let s = args[0].expect_str(heap, "string:substring")?;
    let chars: Vec<char> = s.chars().collect();
    // Negative arguments clamp to 0 and the bounds swap if reversed.
    let raw_start = args[1].expect_int(heap, "string:substring")?.max(0) as usize;
    let raw_end = match args.get(2) {
        Some(arg) => arg.expect_int(heap, "string:substring")?.max(0) as usize,
        None => chars.len(),
    };
    let start = raw_start.min(chars.len()).min(raw_end.min(chars.len()));
    let end = raw_end.min(chars.len()).max(raw_start.min(chars.len()));
    let out: String = chars[start..end].iter().collect();
    heap.alloc_str(out)
}
