//! Structural service identity: a canonical type plus an optional qualifier.
//!
//! A [`Key`] is immutable and value-equal; two keys match iff both the type
//! and the qualifier match. Optionality is never part of a key — a
//! dependency on `Option<T>` unwraps to a key for `T` (see
//! [`crate::dependency`]), and constructing a key for an optional wrapper
//! directly is rejected.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::errors::KeyError;

const OPTION_PREFIX: &str = "core::option::Option<";

/// A named annotation value distinguishing multiple services of one type.
///
/// Qualifiers compare by value, not identity: `Qualifier::new("primary")`
/// built at two different sites is the same qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Qualifier {
    name: String,
    value: Option<String>,
}

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "@{}({})", self.name, v),
            None => write!(f, "@{}", self.name),
        }
    }
}

/// Structural identity of a service: `(type, qualifier?)`.
///
/// Created once per declaration site and safe to cache; cloning is cheap.
#[derive(Debug, Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl Key {
    /// Key for a plain type without qualifier.
    pub fn of<T: Send + Sync + 'static>() -> Result<Self, KeyError> {
        Self::build::<T>(None)
    }

    /// Key for a type distinguished by a qualifier.
    pub fn qualified<T: Send + Sync + 'static>(qualifier: Qualifier) -> Result<Self, KeyError> {
        Self::build::<T>(Some(qualifier))
    }

    fn build<T: Send + Sync + 'static>(qualifier: Option<Qualifier>) -> Result<Self, KeyError> {
        let name = type_name::<T>();
        if is_optional_shape(name) {
            return Err(KeyError::OptionalWrapperType { type_name: name });
        }
        Ok(Self {
            type_id: TypeId::of::<T>(),
            type_name: name,
            qualifier,
        })
    }

    /// Assemble a key from pre-validated raw parts. Used by the declaration
    /// layer after it has unwrapped optional shapes itself.
    pub(crate) fn from_parts(
        type_id: TypeId,
        type_name: &'static str,
        qualifier: Option<Qualifier>,
    ) -> Self {
        Self {
            type_id,
            type_name,
            qualifier,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    /// Same key with the qualifier stripped.
    pub fn without_qualifier(&self) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            qualifier: None,
        }
    }
}

/// Whether a fully qualified type name denotes an optional wrapper shape.
pub(crate) fn is_optional_shape(name: &str) -> bool {
    name.starts_with(OPTION_PREFIX)
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id
            .cmp(&other.type_id)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "`{}` {}", self.type_name, q),
            None => write!(f, "`{}`", self.type_name),
        }
    }
}

// Serialized by name so contract snapshots can be persisted and diffed.
// TypeId is process-local, so keys are serialize-only.
impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Key", 2)?;
        s.serialize_field("type", self.type_name)?;
        s.serialize_field("qualifier", &self.qualifier)?;
        s.end()
    }
}
