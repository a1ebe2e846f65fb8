//! Runtime type tags and compound type shapes.
//!
//! Type tags mirror the value kinds one-for-one and are what literals carry in
//! documents. Compound shapes (`fn`, `list<T>`, `set<T>`, `ref<T>`) exist for
//! airDef signatures and for a separate checker; the runtime only inspects
//! flat tags.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Flat type tag, one per value kind.
///
/// The string forms ("int", "selectResult", ...) are the spellings used in
/// document literals and in `typeof` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    String,
    Void,
    List,
    Set,
    Map,
    Opaque,
    Closure,
    RefCell,
    Future,
    Channel,
    SelectResult,
    Error,
}

/// A type expression: either a flat tag or a compound shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Type {
    /// A flat tag such as `"int"`.
    Tag(TypeTag),
    /// A compound shape such as `{"kind": "list", "item": "int"}`.
    Compound(Box<CompoundType>),
}

/// Compound type shapes carried by airDef signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CompoundType {
    /// Homogeneous list: `list<T>`.
    List { item: Type },
    /// Homogeneous set: `set<T>`.
    Set { item: Type },
    /// Mutable cell: `ref<T>`.
    Ref { inner: Type },
    /// Function shape: `fn(params) -> returns`.
    Fn { params: Vec<Type>, returns: Type },
}

impl Type {
    /// The flat tag this type erases to at runtime.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::Tag(tag) => *tag,
            Self::Compound(compound) => match compound.as_ref() {
                CompoundType::List { .. } => TypeTag::List,
                CompoundType::Set { .. } => TypeTag::Set,
                CompoundType::Ref { .. } => TypeTag::RefCell,
                CompoundType::Fn { .. } => TypeTag::Closure,
            },
        }
    }
}

impl From<TypeTag> for Type {
    fn from(tag: TypeTag) -> Self {
        Self::Tag(tag)
    }
}
