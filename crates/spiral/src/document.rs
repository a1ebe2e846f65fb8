//! The document model: the JSON shape programs arrive in.
//!
//! A document is `{version, nodes[], result}` plus optional `capabilities`,
//! `airDefs`, and `$defs`. [`Program`] is the validated, indexed form the
//! evaluators run: node ids resolved to indices, invariants checked once.

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    errors::ErrorValue,
    expr::{Arg, Expr, Param},
    lir::Block,
    types::Type,
};

/// Capability string enabling the PIR/async surface.
pub const CAPABILITY_ASYNC: &str = "async";

/// A unit of a document's program graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// An expression node: `{id, expr}`.
    Expr { id: String, expr: Expr },
    /// A block node containing a local CFG: `{id, blocks, entry}`.
    Block {
        id: String,
        blocks: Vec<Block>,
        entry: String,
    },
    /// An alias to another node: `{id, $ref}`.
    Ref {
        id: String,
        #[serde(rename = "$ref")]
        target: String,
    },
}

impl Node {
    /// The node's id, whatever its shape.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Expr { id, .. } | Self::Block { id, .. } | Self::Ref { id, .. } => id,
        }
    }
}

/// A named, parameterized definition resembling an operator.
///
/// AirDefs are desugared into closures before evaluation and dispatched by
/// `airRef` under `ns:name` (namespace defaults to `"air"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<String>,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Type>,
    pub body: Arg,
}

impl AirDef {
    /// The `ns:name` key this definition is dispatched under.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.ns.as_deref().unwrap_or("air"), self.name)
    }
}

/// A program document as parsed from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub version: String,
    pub nodes: Vec<Node>,
    /// Id of the terminal node whose value is the document's value.
    pub result: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(rename = "airDefs", default, skip_serializing_if = "Vec::is_empty")]
    pub air_defs: Vec<AirDef>,
    /// Reusable definitions addressed by `$ref` JSON pointers.
    #[serde(rename = "$defs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub defs: IndexMap<String, serde_json::Value>,
}

/// A validated, indexed document ready for evaluation.
///
/// Construction checks the structural invariants once (unique node ids, the
/// `result` id refers to an existing node) so the evaluators can index
/// without re-checking. The raw JSON form is retained for `$ref` pointer
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    doc: Document,
    index: AHashMap<String, usize>,
    raw: serde_json::Value,
}

impl Program {
    /// Validates and indexes a parsed document.
    pub fn from_document(doc: Document) -> Result<Self, ErrorValue> {
        let raw = serde_json::to_value(&doc)
            .map_err(|err| ErrorValue::validation(format!("document not re-serializable: {err}")))?;
        let mut index = AHashMap::with_capacity(doc.nodes.len());
        for (position, node) in doc.nodes.iter().enumerate() {
            if index.insert(node.id().to_owned(), position).is_some() {
                return Err(ErrorValue::validation(format!("duplicate node id '{}'", node.id())));
            }
        }
        if !index.contains_key(&doc.result) {
            return Err(ErrorValue::validation(format!(
                "result id '{}' does not name a node",
                doc.result
            )));
        }
        Ok(Self { doc, index, raw })
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(json: &str) -> Result<Self, ErrorValue> {
        let doc: Document =
            serde_json::from_str(json).map_err(|err| ErrorValue::validation(format!("malformed document: {err}")))?;
        Self::from_document(doc)
    }

    /// Serializes the validated program to a compact byte form.
    ///
    /// The encoding stays self-describing because literal payloads and
    /// `$defs` entries are arbitrary JSON. `load()` restores the program
    /// without re-validating.
    pub fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes a program from the byte form produced by `dump()`.
    pub fn load(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// The underlying document.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The document's raw JSON form, used for `$ref` pointer resolution.
    #[must_use]
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&position| &self.doc.nodes[position])
    }

    /// Looks up a node's index by id.
    #[must_use]
    pub(crate) fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The node at a known index.
    pub(crate) fn node_at(&self, index: usize) -> &Node {
        &self.doc.nodes[index]
    }

    /// Number of nodes in the document.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.doc.nodes.len()
    }

    /// The terminal node id.
    #[must_use]
    pub fn result_id(&self) -> &str {
        &self.doc.result
    }

    /// True when the document declares the given capability.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.doc.capabilities.iter().any(|c| c == capability)
    }
}
