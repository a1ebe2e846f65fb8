//! Public value boundary.
//!
//! [`Object`] is the plain tree handed across the engine boundary: inputs go
//! in as objects, results come out as objects. Unlike the internal value
//! type it owns its structure outright, derives `PartialEq`, and carries a
//! tolerance-aware comparison for cross-implementation conformance checks.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    env::Cells,
    errors::{ErrorCode, ErrorValue, RunResult},
    heap::{Heap, HeapData, OpaqueValue, SetValue},
    value::Value,
};

/// A plain, self-contained runtime value.
///
/// Sets are carried as element vectors (membership order unspecified); maps
/// preserve insertion order. Closures, futures, and channels that escape to
/// the boundary are represented as tagged opaques, since their meaning does
/// not outlive the evaluation that created them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Object {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Object>),
    Set(Vec<Object>),
    Map(IndexMap<String, Object>),
    Opaque {
        tag: String,
        payload: serde_json::Value,
    },
    SelectResult {
        index: i64,
        value: Box<Object>,
    },
    Error {
        code: ErrorCode,
        message: Option<String>,
    },
}

impl Object {
    /// Builds an error object from an error value.
    #[must_use]
    pub fn from_error(err: ErrorValue) -> Self {
        Self::Error {
            code: err.code,
            message: err.message,
        }
    }

    /// Returns the error code if this object is an error.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Error { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Structural comparison with a float tolerance and set-by-membership
    /// semantics, per the cross-implementation conformance contract.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => (a - b).abs() <= tolerance,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => ((*a as f64) - b).abs() <= tolerance,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y, tolerance))
            }
            (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.approx_eq(y, tolerance)))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, x)| b.get(key).is_some_and(|y| x.approx_eq(y, tolerance)))
            }
            (Self::SelectResult { index: i1, value: v1 }, Self::SelectResult { index: i2, value: v2 }) => {
                i1 == i2 && v1.approx_eq(v2, tolerance)
            }
            _ => self == other,
        }
    }

    /// Converts an internal value into a boundary object.
    ///
    /// Cells read through to their contents; closures, futures, and channels
    /// become tagged opaques.
    pub(crate) fn from_value(value: &Value, heap: &Heap, cells: &Cells) -> Self {
        match value {
            Value::Void => Self::Void,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => Self::Float(*f),
            Value::Cell(id) => Self::from_value(cells.read(*id), heap, cells),
            Value::Future(id) => Self::Opaque {
                tag: "future".to_owned(),
                payload: serde_json::Value::from(id.raw()),
            },
            Value::Channel(id) => Self::Opaque {
                tag: "channel".to_owned(),
                payload: serde_json::Value::from(id.raw()),
            },
            Value::Error(err) => Self::Error {
                code: err.code,
                message: err.message.clone(),
            },
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Self::Str(s.clone()),
                HeapData::List(items) => Self::List(items.iter().map(|v| Self::from_value(v, heap, cells)).collect()),
                HeapData::Set(set) => Self::Set(set.values().map(|v| Self::from_value(v, heap, cells)).collect()),
                HeapData::Map(map) => Self::Map(
                    map.iter()
                        .map(|(key, v)| (key.clone(), Self::from_value(v, heap, cells)))
                        .collect(),
                ),
                HeapData::Opaque(opaque) => Self::Opaque {
                    tag: opaque.tag.clone(),
                    payload: opaque.payload.clone(),
                },
                HeapData::Closure(closure) => Self::Opaque {
                    tag: "closure".to_owned(),
                    payload: serde_json::Value::from(closure.params.len()),
                },
                HeapData::SelectResult(sel) => Self::SelectResult {
                    index: sel.index,
                    value: Box::new(Self::from_value(&sel.value, heap, cells)),
                },
            },
        }
    }

    /// Converts a boundary object into an internal value, allocating heap
    /// structure as needed. Used for evaluation inputs.
    pub(crate) fn to_value(&self, heap: &mut Heap) -> RunResult<Value> {
        match self {
            Self::Void => Ok(Value::Void),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Int(i) => Ok(Value::Int(*i)),
            Self::Float(f) => Ok(Value::Float(*f)),
            Self::Str(s) => heap.alloc_str(s.clone()),
            Self::List(items) => {
                let values = items.iter().map(|item| item.to_value(heap)).collect::<RunResult<_>>()?;
                heap.alloc_list(values)
            }
            Self::Set(items) => {
                let mut set = SetValue::new();
                for item in items {
                    let value = item.to_value(heap)?;
                    let key = value.canonical_key(heap)?;
                    set.insert(key, value);
                }
                heap.alloc_set(set)
            }
            Self::Map(entries) => {
                let mut map = IndexMap::new();
                for (key, item) in entries {
                    map.insert(key.clone(), item.to_value(heap)?);
                }
                heap.alloc_map(map)
            }
            Self::Opaque { tag, payload } => {
                let id = heap.allocate(HeapData::Opaque(OpaqueValue {
                    tag: tag.clone(),
                    payload: payload.clone(),
                }))?;
                Ok(Value::Ref(id))
            }
            Self::SelectResult { index, value } => {
                let inner = value.to_value(heap)?;
                let id = heap.allocate(HeapData::SelectResult(crate::heap::SelectOutcome {
                    index: *index,
                    value: inner,
                }))?;
                Ok(Value::Ref(id))
            }
            Self::Error { code, message } => Ok(Value::Error(Box::new(ErrorValue {
                code: *code,
                message: message.clone(),
            }))),
        }
    }
}
