//! `$ref` resolution across local and external documents.
//!
//! References are JSON-pointer shaped: `#/$defs/helper` addresses the current
//! document, `pkg://util#/$defs/helper` addresses a registered external
//! document. Resolution follows chained references, detects cycles via a
//! resolution stack, and enforces a configurable depth limit. External
//! documents are registered up front; the resolver never performs I/O.
//!
//! As a convenience for node graphs, a pointer segment indexing into an array
//! of objects may name an element's `id` instead of its position, so
//! `#/nodes/acc` addresses the node with id `"acc"`.

use ahash::AHashMap;
use serde_json::Value as Json;

use crate::{document::Program, errors::ErrorValue, limits::DEFAULT_MAX_REF_DEPTH};

/// Resolves `$ref` strings against a document cache.
#[derive(Debug, Default)]
pub struct RefResolver {
    /// External documents keyed by resolved URI.
    cache: AHashMap<String, Json>,
    max_depth: u32,
}

impl RefResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: AHashMap::new(),
            max_depth: DEFAULT_MAX_REF_DEPTH,
        }
    }

    /// Overrides the maximum reference-chain depth.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Registers an external document's JSON under a URI.
    pub fn register(&mut self, uri: impl Into<String>, doc: Json) {
        self.cache.insert(uri.into(), doc);
    }

    /// Registers a validated program under a URI.
    pub fn register_program(&mut self, uri: impl Into<String>, program: &Program) {
        self.cache.insert(uri.into(), program.raw().clone());
    }

    /// Resolves a reference against the local document, following chains.
    pub fn resolve(&self, reference: &str, local: &Json) -> Result<Json, ErrorValue> {
        let mut stack = Vec::new();
        self.resolve_inner(reference, local, &mut stack)
    }

    fn resolve_inner(&self, reference: &str, local: &Json, stack: &mut Vec<String>) -> Result<Json, ErrorValue> {
        if stack.iter().any(|seen| seen == reference) {
            return Err(ErrorValue::domain(format!("reference cycle through '{reference}'")));
        }
        if stack.len() as u32 >= self.max_depth {
            return Err(ErrorValue::domain(format!(
                "reference depth limit ({}) exceeded at '{reference}'",
                self.max_depth
            )));
        }
        stack.push(reference.to_owned());

        let (doc, pointer) = self.split(reference, local)?;
        let mut resolved = follow_pointer(doc, pointer)
            .ok_or_else(|| ErrorValue::validation(format!("unresolved reference '{reference}'")))?
            .clone();

        // Follow chained references: the resolved value may itself be an alias.
        if let Some(next) = resolved.get("$ref").and_then(Json::as_str) {
            let next = next.to_owned();
            resolved = self.resolve_inner(&next, doc, stack)?;
        }
        stack.pop();
        Ok(resolved)
    }

    /// Splits `uri#/pointer` into the target document and pointer part.
    fn split<'a>(&'a self, reference: &'a str, local: &'a Json) -> Result<(&'a Json, &'a str), ErrorValue> {
        match reference.split_once('#') {
            Some(("", pointer)) => Ok((local, pointer)),
            Some((uri, pointer)) => {
                let doc = self
                    .cache
                    .get(uri)
                    .ok_or_else(|| ErrorValue::validation(format!("unknown document '{uri}'")))?;
                Ok((doc, pointer))
            }
            None => Err(ErrorValue::validation(format!(
                "reference '{reference}' is missing a '#' fragment"
            ))),
        }
    }
}

/// JSON-pointer traversal with the id-addressing extension for arrays.
fn follow_pointer<'a>(doc: &'a Json, pointer: &str) -> Option<&'a Json> {
    if pointer.is_empty() {
        return Some(doc);
    }
    let mut current = doc;
    for raw_segment in pointer.strip_prefix('/')?.split('/') {
        let segment = raw_segment.replace("~1", "/").replace("~0", "~");
        current = match current {
            Json::Object(map) => map.get(&segment)?,
            Json::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get(index)?,
                Err(_) => items
                    .iter()
                    .find(|item| item.get("id").and_then(Json::as_str) == Some(segment.as_str()))?,
            },
            _ => return None,
        };
    }
    Some(current)
}
