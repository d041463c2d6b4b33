//! A single unresolved requirement extracted from a declaration site.
//!
//! The engine never reflects over types itself. A scanner (out of scope
//! here) reports each injection site as a [`Declared`] shape; this module
//! reduces that shape to a validated [`ServiceDependency`]: a key, an
//! optionality kind, and informational provenance.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::errors::{DeclarationError, DependencyError, KeyError};
use crate::key::{is_optional_shape, Key, Qualifier};

/// How an unresolved-but-permitted dependency is substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalKind {
    /// Must be bound to a provider; no substitute exists.
    Required,
    /// Declared through an optional wrapper; substitutes an empty value.
    Wrapped,
    /// Declared nullable; substitutes an absent value.
    Nullable,
}

impl OptionalKind {
    pub fn is_required(self) -> bool {
        matches!(self, OptionalKind::Required)
    }
}

/// Where a dependency came from. Informational only: never part of
/// equality or hashing.
#[derive(Debug, Clone)]
pub struct Provenance {
    declaring_type: String,
    member: String,
    parameter: Option<usize>,
}

impl Provenance {
    pub fn field(declaring_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member: field.into(),
            parameter: None,
        }
    }

    pub fn parameter(
        declaring_type: impl Into<String>,
        member: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            member: member.into(),
            parameter: Some(index),
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn parameter_index(&self) -> Option<usize> {
        self.parameter
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter {
            Some(i) => write!(f, "{}::{}#{}", self.declaring_type, self.member, i),
            None => write!(f, "{}::{}", self.declaring_type, self.member),
        }
    }
}

/// The raw shape of one injection site, as a scanner reports it: the base
/// type, whether it was wrapped in an optional, whether it was annotated
/// nullable, and the qualifier annotations found on the site.
#[derive(Debug, Clone)]
pub struct Declared {
    type_id: TypeId,
    type_name: &'static str,
    wrapped: bool,
    nullable: bool,
    qualifiers: Vec<Qualifier>,
}

impl Declared {
    /// A site declared as plain `T`.
    pub fn plain<T: Send + Sync + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            wrapped: false,
            nullable: false,
            qualifiers: Vec::new(),
        }
    }

    /// A site declared as `Option<T>`; `T` is the base type recorded here.
    pub fn optional<T: Send + Sync + 'static>() -> Self {
        Self {
            wrapped: true,
            ..Self::plain::<T>()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// A typed, qualified, optionally-substitutable request for a service.
///
/// Computed once per declaring type and cached; never mutated afterward.
#[derive(Debug, Clone)]
pub struct ServiceDependency {
    key: Key,
    optional_kind: OptionalKind,
    provenance: Option<Provenance>,
}

/// Outcome of resolving one dependency slot at runtime.
#[derive(Debug, Clone)]
pub enum ResolvedValue {
    Present(Arc<dyn Any + Send + Sync>),
    Empty,
}

impl ResolvedValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResolvedValue::Empty)
    }
}

impl ServiceDependency {
    /// Reduce a declared site to a validated dependency.
    ///
    /// One optional-wrapper level is unwrapped and recorded as
    /// [`OptionalKind::Wrapped`]; a nullable annotation records
    /// [`OptionalKind::Nullable`]. The two are mutually exclusive, and the
    /// post-unwrap type must not itself be an optional wrapper.
    pub fn from_declared(
        declared: Declared,
        provenance: Provenance,
    ) -> Result<Self, DeclarationError> {
        let Declared {
            type_id,
            type_name,
            wrapped,
            nullable,
            mut qualifiers,
        } = declared;

        if wrapped && nullable {
            return Err(DeclarationError::NullableOptionalConflict { type_name });
        }
        if is_optional_shape(type_name) {
            if wrapped {
                return Err(DeclarationError::NestedOptional { type_name });
            }
            return Err(KeyError::OptionalWrapperType { type_name }.into());
        }
        if qualifiers.len() > 1 {
            return Err(KeyError::MultipleQualifiers {
                count: qualifiers.len(),
            }
            .into());
        }

        let optional_kind = if wrapped {
            OptionalKind::Wrapped
        } else if nullable {
            OptionalKind::Nullable
        } else {
            OptionalKind::Required
        };

        Ok(Self {
            key: Key::from_parts(type_id, type_name, qualifiers.pop()),
            optional_kind,
            provenance: Some(provenance),
        })
    }

    /// A required dependency on an already-built key, without provenance.
    pub fn required(key: Key) -> Self {
        Self {
            key,
            optional_kind: OptionalKind::Required,
            provenance: None,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn optional_kind(&self) -> OptionalKind {
        self.optional_kind
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// The substitute for this dependency when no provider is bound.
    ///
    /// Calling this on a required dependency is a caller bug and reported
    /// as [`DependencyError::NotOptional`].
    pub fn empty_value(&self) -> Result<ResolvedValue, DependencyError> {
        match self.optional_kind {
            OptionalKind::Required => Err(DependencyError::NotOptional {
                key: self.key.clone(),
            }),
            OptionalKind::Wrapped | OptionalKind::Nullable => Ok(ResolvedValue::Empty),
        }
    }

    /// Accept a successfully resolved value for this slot, verifying it is
    /// of the declared concrete type.
    pub fn wrap_if_optional(
        &self,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Result<ResolvedValue, DependencyError> {
        if value.as_ref().type_id() != self.key.type_id() {
            return Err(DependencyError::TypeMismatch {
                key: self.key.clone(),
                found: format!("{:?}", value.as_ref().type_id()),
            });
        }
        Ok(ResolvedValue::Present(value))
    }
}

// Provenance is informational and never participates in equality.
impl PartialEq for ServiceDependency {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.optional_kind == other.optional_kind
    }
}

impl Eq for ServiceDependency {}

impl Hash for ServiceDependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.optional_kind.hash(state);
    }
}

impl fmt::Display for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.optional_kind {
            OptionalKind::Required => "required",
            OptionalKind::Wrapped => "optional",
            OptionalKind::Nullable => "nullable",
        };
        match &self.provenance {
            Some(p) => write!(f, "{kind} dependency on {} at {p}", self.key),
            None => write!(f, "{kind} dependency on {}", self.key),
        }
    }
}
