use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Unique identifier for a lexical frame in the frame arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(u32);

impl FrameId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("frame arena overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unique identifier for a mutable cell in the ref-cell table.
///
/// Cell identity is the position in the table: two cells are the same cell
/// exactly when their ids are equal, and assignment updates the slot in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(u32);

impl CellId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("cell table overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One lexical frame: a name→value map plus a parent link.
///
/// Lookup walks the parent chain; binding always writes the local map, so an
/// inner `let` shadows without touching enclosing frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Frame {
    parent: Option<FrameId>,
    slots: AHashMap<String, Value>,
}

/// Arena of lexical frames.
///
/// Closures capture a `FrameId` rather than an owned environment, so a frame
/// may outlive the expression that created it and may even refer to a value
/// that refers back to the frame (the `fix` self-reference). Index-based
/// frames make that cycle representable without recursive owned pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Frames {
    arena: Vec<Frame>,
}

impl Frames {
    /// Creates the arena with an empty root frame at index 0.
    pub fn new() -> Self {
        Self {
            arena: vec![Frame::default()],
        }
    }

    /// The root frame (document top level).
    pub fn root(&self) -> FrameId {
        FrameId(0)
    }

    /// Allocates an empty child frame of `parent`.
    pub fn child(&mut self, parent: FrameId) -> FrameId {
        let id = FrameId::new(self.arena.len());
        self.arena.push(Frame {
            parent: Some(parent),
            slots: AHashMap::new(),
        });
        id
    }

    /// Allocates a root-level frame seeded with the given bindings.
    ///
    /// Used by `spawn` to snapshot the caller's environment: the task sees the
    /// bindings as they were at spawn time and later caller-side rebinds do
    /// not leak in.
    pub fn detached(&mut self, slots: AHashMap<String, Value>) -> FrameId {
        let id = FrameId::new(self.arena.len());
        self.arena.push(Frame { parent: None, slots });
        id
    }

    /// Binds `name` in `frame`, shadowing any binding in enclosing frames.
    pub fn bind(&mut self, frame: FrameId, name: impl Into<String>, value: Value) {
        self.arena[frame.index()].slots.insert(name.into(), value);
    }

    /// Looks up `name` starting at `frame` and walking the parent chain.
    pub fn lookup(&self, frame: FrameId, name: &str) -> Option<&Value> {
        let mut current = Some(frame);
        while let Some(id) = current {
            let entry = &self.arena[id.index()];
            if let Some(value) = entry.slots.get(name) {
                return Some(value);
            }
            current = entry.parent;
        }
        None
    }

    /// Returns true when `name` is bound at `frame` or any enclosing frame.
    pub fn is_bound(&self, frame: FrameId, name: &str) -> bool {
        self.lookup(frame, name).is_some()
    }

    /// Flattens the chain starting at `frame` into a single name→value map.
    ///
    /// Inner bindings win over outer ones. This is the snapshot `spawn` hands
    /// to [`Frames::detached`].
    pub fn flatten(&self, frame: FrameId) -> AHashMap<String, Value> {
        // Walk outward collecting frames, then apply outermost-first so inner
        // bindings overwrite.
        let mut chain = Vec::new();
        let mut current = Some(frame);
        while let Some(id) = current {
            chain.push(id);
            current = self.arena[id.index()].parent;
        }
        let mut flat = AHashMap::new();
        for id in chain.into_iter().rev() {
            for (name, value) in &self.arena[id.index()].slots {
                flat.insert(name.clone(), value.clone());
            }
        }
        flat
    }

    /// Number of frames allocated so far.
    pub fn len(&self) -> usize {
        self.arena.len()
    }
}

/// The mutable ref-cell table.
///
/// `assign(target, value)` creates a named cell on first write and reuses it
/// afterwards; cells live for the duration of the evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Cells {
    slots: Vec<Value>,
    by_name: AHashMap<String, CellId>,
}

impl Cells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` into the cell named `target`, creating it if absent.
    pub fn assign(&mut self, target: &str, value: Value) -> CellId {
        match self.by_name.get(target) {
            Some(&id) => {
                self.slots[id.index()] = value;
                id
            }
            None => {
                let id = CellId::new(self.slots.len());
                self.slots.push(value);
                self.by_name.insert(target.to_owned(), id);
                id
            }
        }
    }

    /// Looks up the cell id bound to `target`, if any.
    pub fn id_of(&self, target: &str) -> Option<CellId> {
        self.by_name.get(target).copied()
    }

    /// Reads a cell's current contents.
    pub fn read(&self, id: CellId) -> &Value {
        &self.slots[id.index()]
    }

    /// Replaces a cell's contents in place.
    pub fn write(&mut self, id: CellId, value: Value) {
        self.slots[id.index()] = value;
    }

    /// Iterates named cells with their current contents.
    pub fn iter_named(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.by_name.iter().map(|(name, id)| (name, &self.slots[id.index()]))
    }
}
