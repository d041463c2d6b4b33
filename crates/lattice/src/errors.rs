//! Error taxonomy for the resolution engine.
//!
//! Build-time errors (`KeyError` through `BuildError`) abort the whole graph
//! build; callers receive one aggregated `GraphBuildFailure` listing every
//! independent problem found, never a partial graph. Runtime errors
//! (`ResolveError`, `ConstructionError`) surface on first access and, for
//! lazy services, propagate to every thread blocked on the same cell.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::key::Key;

/// Malformed key construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// An optional wrapper was used directly as a service type. Optionality
    /// is modeled on the dependency, never folded into the key.
    #[error("optional wrapper `{type_name}` cannot be used as a service key")]
    OptionalWrapperType { type_name: &'static str },

    /// A declaration site carried more than one qualifier.
    #[error("declaration carries {count} qualifiers, at most one is allowed")]
    MultipleQualifiers { count: usize },
}

/// Malformed dependency or factory declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    /// The type inside an optional wrapper is itself an optional wrapper.
    #[error("cannot nest optionals: `{type_name}` is already an optional wrapper")]
    NestedOptional { type_name: &'static str },

    /// A site was declared both nullable and optional-wrapped.
    #[error("declaration of `{type_name}` is both nullable and optional-wrapped")]
    NullableOptionalConflict { type_name: &'static str },

    /// A designated factory method returns unit.
    #[error("factory method `{name}` must not return unit")]
    UnitFactoryReturn { name: String },

    /// A designated factory method returns an optional wrapper.
    #[error("factory method `{name}` must not return an optional wrapper")]
    OptionalFactoryReturn { name: String },

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Factory discovery could not uniquely pick a constructor or method.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error("ambiguous factory for `{type_name}`: {reason}")]
    Ambiguous { type_name: String, reason: String },

    #[error("no factory candidates declared for `{type_name}`")]
    NoCandidates { type_name: String },

    #[error(transparent)]
    Declaration(#[from] DeclarationError),
}

/// Misuse of a dependency's optionality contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// `empty_value()` was called on a required dependency.
    #[error("dependency on {key} is required and has no empty value")]
    NotOptional { key: Key },

    /// A resolved value does not match the dependency's key type.
    #[error("value of concrete type `{found}` cannot satisfy dependency on {key}")]
    TypeMismatch { key: Key, found: String },
}

/// Contract finalization or compatibility failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    /// The same key ended up in both the required and the optional set.
    /// Required/optional promotion is not guessed; the build surfaces it.
    #[error("{key} appears in both the required and the optional set")]
    RequiredAndOptional { key: Key },

    /// A successor revision broke backward compatibility.
    #[error(
        "contract is not backward compatible: {} provided key(s) lost, {} new requirement(s)",
        lost_provides.len(),
        new_requires.len()
    )]
    Incompatible {
        lost_provides: Vec<Key>,
        new_requires: Vec<Key>,
    },
}

/// One independent problem found while building a graph.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Two producers registered under the same key in one scope. The build
    /// fails; nothing is silently kept or dropped.
    #[error("duplicate registration for {key}")]
    DuplicateService { key: Key },

    /// A required dependency has no provider in scope or any ancestor.
    #[error("{requested_by} requires {key}, but no provider is registered")]
    UnresolvedDependency { key: Key, requested_by: Key },

    /// A cycle in the declared dependency graph. The path is ordered and
    /// closed: the first key appears again at the end.
    #[error("cyclic dependency: {}", format_cycle(path))]
    CyclicDependency { path: Vec<Key> },

    /// An exported key has no local provider.
    #[error("export of {key} does not resolve to a registered service")]
    ExportResolution { key: Key },

    #[error(transparent)]
    Contract(#[from] ContractError),

    /// Eager construction of a singleton failed during graph finalization.
    #[error("eager construction of {key} failed")]
    Construction {
        key: Key,
        #[source]
        source: ConstructionError,
    },
}

impl BuildError {
    /// Stable category label for logging and aggregation.
    pub fn category(&self) -> &'static str {
        match self {
            BuildError::DuplicateService { .. } => "duplicate",
            BuildError::UnresolvedDependency { .. } => "unresolved",
            BuildError::CyclicDependency { .. } => "cycle",
            BuildError::ExportResolution { .. } => "export",
            BuildError::Contract(_) => "contract",
            BuildError::Construction { .. } => "construction",
        }
    }
}

fn format_cycle(path: &[Key]) -> String {
    path.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Aggregated outcome of a failed graph build. Every independent problem is
/// listed, not just the first one encountered.
#[derive(Debug)]
pub struct GraphBuildFailure {
    pub errors: Vec<BuildError>,
}

impl GraphBuildFailure {
    pub fn new(errors: Vec<BuildError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[BuildError] {
        &self.errors
    }

    /// True when any contained error has the given category.
    pub fn has_category(&self, category: &str) -> bool {
        self.errors.iter().any(|e| e.category() == category)
    }
}

impl fmt::Display for GraphBuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "service graph build failed with {} error(s):", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            writeln!(f, "  {}. [{}] {}", i + 1, err.category(), err)?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphBuildFailure {}

/// The underlying producer failed while instantiating a service. Cloneable
/// so one failed lazy construction can be reported identically to every
/// waiter of that attempt.
#[derive(Debug, Clone)]
pub struct ConstructionError {
    service: String,
    cause: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl ConstructionError {
    pub fn new(
        service: impl Into<String>,
        cause: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        Self {
            service: service.into(),
            cause: Arc::from(cause),
        }
    }

    pub fn message(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            cause: Arc::new(ProducerMessage(message.into())),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constructing `{}` failed: {}", self.service, self.cause)
    }
}

impl std::error::Error for ConstructionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct ProducerMessage(String);

/// Runtime resolution failure on a valid graph.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No service is registered under the key, in this scope or any ancestor.
    #[error("no service registered for {key}")]
    NotFound { key: Key },

    /// A lazy construction requested itself on the same thread. Detected via
    /// the memoization cell's owner, before the thread can deadlock on its
    /// own lock.
    #[error("cyclic construction: {key} requested itself while being built")]
    CyclicConstruction { key: Key },

    /// The stored service does not downcast to the requested type.
    #[error("service for {key} is not of the requested type `{expected}`")]
    TypeMismatch { key: Key, expected: &'static str },

    /// A producer asked for a dependency slot its node never declared.
    #[error("{key} has no dependency slot {index}")]
    UnknownSlot { key: Key, index: usize },

    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}
