use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelId,
    env::CellId,
    errors::{ErrorCode, ErrorValue, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    task::TaskId,
    types::TypeTag,
};

/// Maximum nesting depth when walking value structure (canonical keys,
/// structural equality, display). Heap data is acyclic by construction, but
/// hostile documents can still nest deeply.
const MAX_DATA_DEPTH: usize = 64;

/// Primary runtime value.
///
/// This enum uses a hybrid design: small immediate values (ints, bools,
/// handles) are stored inline, while values with interior structure (strings,
/// lists, sets, maps, opaques, closures, select results) live in the heap
/// arena behind `Ref(HeapId)`.
///
/// NOTE: it's important to keep this type small; it is cloned on every
/// environment lookup and channel transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The unit value.
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Heap-allocated payload (string, list, set, map, opaque, closure,
    /// select result).
    Ref(HeapId),
    /// Mutable cell handle; identity is the position in the ref-cell table.
    Cell(CellId),
    /// A task's eventual result handle.
    Future(TaskId),
    /// A channel handle.
    Channel(ChannelId),
    /// First-class error.
    Error(Box<ErrorValue>),
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Self::Error(Box::new(err))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl Value {
    /// The flat type tag of this value.
    pub fn type_tag(&self, heap: &Heap) -> TypeTag {
        match self {
            Self::Void => TypeTag::Void,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Float(_) => TypeTag::Float,
            Self::Cell(_) => TypeTag::RefCell,
            Self::Future(_) => TypeTag::Future,
            Self::Channel(_) => TypeTag::Channel,
            Self::Error(_) => TypeTag::Error,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => TypeTag::String,
                HeapData::List(_) => TypeTag::List,
                HeapData::Set(_) => TypeTag::Set,
                HeapData::Map(_) => TypeTag::Map,
                HeapData::Opaque(_) => TypeTag::Opaque,
                HeapData::Closure(_) => TypeTag::Closure,
                HeapData::SelectResult(_) => TypeTag::SelectResult,
            },
        }
    }

    /// Expects an integer, with a `TypeError` otherwise.
    pub fn expect_int(&self, heap: &Heap, context: &str) -> RunResult<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(RunError::type_error(format!(
                "{context} expects int, got {}",
                other.type_tag(heap)
            ))),
        }
    }

    /// Expects a boolean, with a `TypeError` otherwise.
    pub fn expect_bool(&self, heap: &Heap, context: &str) -> RunResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(RunError::type_error(format!(
                "{context} expects bool, got {}",
                other.type_tag(heap)
            ))),
        }
    }

    /// Expects a string, with a `TypeError` otherwise.
    pub fn expect_str<'h>(&self, heap: &'h Heap, context: &str) -> RunResult<&'h str> {
        if let Self::Ref(id) = self
            && let Some(text) = heap.expect_str(*id)
        {
            return Ok(text);
        }
        Err(RunError::type_error(format!(
            "{context} expects string, got {}",
            self.type_tag(heap)
        )))
    }

    /// Expects a list, with a `TypeError` otherwise.
    pub fn expect_list<'h>(&self, heap: &'h Heap, context: &str) -> RunResult<&'h [Value]> {
        if let Self::Ref(id) = self
            && let HeapData::List(items) = heap.get(*id)
        {
            return Ok(items);
        }
        Err(RunError::type_error(format!(
            "{context} expects list, got {}",
            self.type_tag(heap)
        )))
    }

    /// Widens ints and floats to `f64` for mixed arithmetic.
    pub fn as_number(&self, heap: &Heap, context: &str) -> RunResult<f64> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            other => Err(RunError::type_error(format!(
                "{context} expects number, got {}",
                other.type_tag(heap)
            ))),
        }
    }

    /// Structural equality, reading through heap references.
    ///
    /// Ints and floats compare across tags (`1 == 1.0`); sets compare by
    /// membership; closures, cells, futures, and channels compare by
    /// identity.
    pub fn structural_eq(&self, other: &Self, heap: &Heap) -> bool {
        structural_eq_at(self, other, heap, 0)
    }

    /// Canonical encoding for set membership and dedup.
    ///
    /// Structurally equal values produce equal keys; identity-only values
    /// (closures, cells, futures, channels) encode their ids.
    pub fn canonical_key(&self, heap: &Heap) -> RunResult<String> {
        let mut out = String::new();
        canonical_key_into(self, heap, &mut out, 0)?;
        Ok(out)
    }

    /// Human-readable rendering, used by the `print` effect and error
    /// messages. Strings render unquoted at the top level.
    pub fn display(&self, heap: &Heap) -> String {
        let mut out = String::new();
        display_into(self, heap, &mut out, false, 0);
        out
    }

    /// Quoted rendering, used inside containers.
    pub fn repr(&self, heap: &Heap) -> String {
        let mut out = String::new();
        display_into(self, heap, &mut out, true, 0);
        out
    }
}

fn structural_eq_at(a: &Value, b: &Value, heap: &Heap, depth: usize) -> bool {
    if depth > MAX_DATA_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::Void, Value::Void) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Cell(x), Value::Cell(y)) => x == y,
        (Value::Future(x), Value::Future(y)) => x == y,
        (Value::Channel(x), Value::Channel(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => x == y,
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return true;
            }
            match (heap.get(*x), heap.get(*y)) {
                (HeapData::Str(s1), HeapData::Str(s2)) => s1 == s2,
                (HeapData::List(l1), HeapData::List(l2)) => {
                    l1.len() == l2.len()
                        && l1
                            .iter()
                            .zip(l2.iter())
                            .all(|(v1, v2)| structural_eq_at(v1, v2, heap, depth + 1))
                }
                (HeapData::Set(s1), HeapData::Set(s2)) => {
                    s1.len() == s2.len() && s1.iter().all(|(key, _)| s2.contains_key(key))
                }
                (HeapData::Map(m1), HeapData::Map(m2)) => {
                    m1.len() == m2.len()
                        && m1.iter().all(|(key, v1)| {
                            m2.get(key).is_some_and(|v2| structural_eq_at(v1, v2, heap, depth + 1))
                        })
                }
                (HeapData::Opaque(o1), HeapData::Opaque(o2)) => o1 == o2,
                (HeapData::SelectResult(r1), HeapData::SelectResult(r2)) => {
                    r1.index == r2.index && structural_eq_at(&r1.value, &r2.value, heap, depth + 1)
                }
                // Closures compare by identity only; unequal ids are unequal.
                _ => false,
            }
        }
        _ => false,
    }
}

fn canonical_key_into(value: &Value, heap: &Heap, out: &mut String, depth: usize) -> RunResult<()> {
    if depth > MAX_DATA_DEPTH {
        return Err(RunError::raise(
            ErrorCode::DomainError,
            "value nesting exceeds canonicalization depth",
        ));
    }
    match value {
        Value::Void => out.push('v'),
        Value::Bool(b) => {
            let _ = write!(out, "b:{b}");
        }
        // Ints and floats that compare equal must share a key (1 == 1.0), so
        // integral floats use the int encoding.
        Value::Int(i) => {
            let _ = write!(out, "n:{i}");
        }
        Value::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                let _ = write!(out, "n:{}", *f as i64);
            } else {
                let _ = write!(out, "f:{}", f.to_bits());
            }
        }
        Value::Cell(id) => {
            let _ = write!(out, "cell:{}", id.index());
        }
        Value::Future(id) => {
            let _ = write!(out, "fut:{}", id.raw());
        }
        Value::Channel(id) => {
            let _ = write!(out, "chan:{}", id.raw());
        }
        Value::Error(err) => {
            let _ = write!(out, "e:{}:{}", err.code, err.message.as_deref().unwrap_or(""));
        }
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => {
                let _ = write!(out, "s:{}:{s}", s.len());
            }
            HeapData::List(items) => {
                out.push_str("l[");
                for item in items {
                    canonical_key_into(item, heap, out, depth + 1)?;
                    out.push(',');
                }
                out.push(']');
            }
            HeapData::Set(set) => {
                // Membership keys, sorted so insertion order is irrelevant.
                let mut keys: Vec<&String> = set.iter().map(|(key, _)| key).collect();
                keys.sort();
                out.push_str("S{");
                for key in keys {
                    out.push_str(key);
                    out.push(',');
                }
                out.push('}');
            }
            HeapData::Map(map) => {
                out.push_str("m{");
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    let _ = write!(out, "{}:", key);
                    canonical_key_into(&map[key.as_str()], heap, out, depth + 1)?;
                    out.push(',');
                }
                out.push('}');
            }
            HeapData::Opaque(opaque) => {
                let _ = write!(out, "o:{}:{}", opaque.tag, opaque.payload);
            }
            HeapData::Closure(_) => {
                let _ = write!(out, "clo:{}", id.index());
            }
            HeapData::SelectResult(sel) => {
                let _ = write!(out, "sel:{}:", sel.index);
                canonical_key_into(&sel.value, heap, out, depth + 1)?;
            }
        },
    }
    Ok(())
}

fn display_into(value: &Value, heap: &Heap, out: &mut String, quote_strings: bool, depth: usize) {
    if depth > MAX_DATA_DEPTH {
        out.push('…');
        return;
    }
    match value {
        Value::Void => out.push_str("void"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => {
            if f.is_finite() {
                let mut buffer = ryu::Buffer::new();
                out.push_str(buffer.format(*f));
            } else {
                let _ = write!(out, "{f}");
            }
        }
        Value::Cell(id) => {
            let _ = write!(out, "<cell {}>", id.index());
        }
        Value::Future(id) => {
            let _ = write!(out, "<future {}>", id.raw());
        }
        Value::Channel(id) => {
            let _ = write!(out, "<channel {}>", id.raw());
        }
        Value::Error(err) => {
            let _ = write!(out, "error({err})");
        }
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => {
                if quote_strings {
                    let _ = write!(out, "{s:?}");
                } else {
                    out.push_str(s);
                }
            }
            HeapData::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    display_into(item, heap, out, true, depth + 1);
                }
                out.push(']');
            }
            HeapData::Set(set) => {
                out.push('{');
                for (i, item) in set.values().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    display_into(item, heap, out, true, depth + 1);
                }
                out.push('}');
            }
            HeapData::Map(map) => {
                out.push('{');
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{key:?}: ");
                    display_into(item, heap, out, true, depth + 1);
                }
                out.push('}');
            }
            HeapData::Opaque(opaque) => {
                let _ = write!(out, "<opaque {}>", opaque.tag);
            }
            HeapData::Closure(closure) => {
                let _ = write!(out, "<closure/{}>", closure.params.len());
            }
            HeapData::SelectResult(sel) => {
                let _ = write!(out, "selectResult({}, ", sel.index);
                display_into(&sel.value, heap, out, true, depth + 1);
                out.push(')');
            }
        },
    }
}
