use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    closure::Closure,
    errors::{ErrorCode, RunError, RunResult},
    limits::EvalLimits,
    value::Value,
};

/// Unique identifier for a value stored in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("heap arena overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An opaque host-domain value: a tag plus an arbitrary JSON payload.
///
/// The engine never inspects the payload; it only carries it, compares it
/// structurally, and hands it back at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueValue {
    pub tag: String,
    pub payload: serde_json::Value,
}

/// The payload of a `select`/`await` with `returnIndex`: which branch won and
/// what it produced. Index `-1` marks a timeout win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOutcome {
    pub index: i64,
    pub value: Value,
}

/// Set storage: insertion-ordered entries keyed by the canonical encoding of
/// each element, so membership and dedup are structural rather than by
/// reference identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetValue {
    entries: IndexMap<String, Value>,
}

impl SetValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an element under its canonical key; duplicates are dropped.
    pub fn insert(&mut self, key: String, value: Value) {
        self.entries.entry(key).or_insert(value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

/// Heap-allocated value payloads.
///
/// Immediate values (ints, bools, ids) live inline in [`Value`]; everything
/// with interior structure lives here behind a [`HeapId`]. Heap data is
/// immutable once allocated: mutation happens only through the ref-cell
/// table, never through heap slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeapData {
    Str(String),
    List(Vec<Value>),
    Set(SetValue),
    Map(IndexMap<String, Value>),
    Opaque(OpaqueValue),
    Closure(Closure),
    SelectResult(SelectOutcome),
}

impl HeapData {
    /// Static variant name, used for heap statistics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Set(_) => "Set",
            Self::Map(_) => "Map",
            Self::Opaque(_) => "Opaque",
            Self::Closure(_) => "Closure",
            Self::SelectResult(_) => "SelectResult",
        }
    }
}

/// Snapshot of heap state at a point in time.
///
/// The per-kind map uses `BTreeMap` for deterministic iteration order, making
/// snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of objects allocated.
    pub live_objects: usize,
    /// Breakdown by `HeapData` variant name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
}

/// Arena of heap-allocated values for one evaluation.
///
/// Slots are append-only and live until the evaluation ends; reachability is
/// the only reclamation story the engine promises. An optional allocation
/// budget bounds hostile documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heap {
    slots: Vec<HeapData>,
    max_allocations: Option<usize>,
}

impl Heap {
    pub fn new(limits: &EvalLimits) -> Self {
        Self {
            slots: Vec::new(),
            max_allocations: limits.max_allocations,
        }
    }

    /// Allocates a new slot, failing when the allocation budget is exhausted.
    pub fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        if let Some(limit) = self.max_allocations
            && self.slots.len() >= limit
        {
            return Err(RunError::raise(
                ErrorCode::DomainError,
                format!("allocation limit exceeded: {limit}"),
            ));
        }
        let id = HeapId::new(self.slots.len());
        self.slots.push(data);
        Ok(id)
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()]
    }

    /// Allocates a string and wraps it as a value.
    pub fn alloc_str(&mut self, text: impl Into<String>) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Str(text.into()))?))
    }

    /// Allocates a list and wraps it as a value.
    pub fn alloc_list(&mut self, items: Vec<Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::List(items))?))
    }

    /// Allocates a set and wraps it as a value.
    pub fn alloc_set(&mut self, set: SetValue) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Set(set))?))
    }

    /// Allocates a map and wraps it as a value.
    pub fn alloc_map(&mut self, map: IndexMap<String, Value>) -> RunResult<Value> {
        Ok(Value::Ref(self.allocate(HeapData::Map(map))?))
    }

    /// Expects the slot to hold a string.
    pub fn expect_str(&self, id: HeapId) -> Option<&str> {
        match self.get(id) {
            HeapData::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Expects the slot to hold a closure.
    pub fn expect_closure(&self, id: HeapId) -> Option<&Closure> {
        match self.get(id) {
            HeapData::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    /// Builds a point-in-time snapshot of heap contents.
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind = BTreeMap::new();
        for slot in &self.slots {
            *objects_by_kind.entry(slot.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.slots.len(),
            objects_by_kind,
        }
    }
}
