//! Producer model and factory-candidate selection.
//!
//! A scanner hands the engine a list of [`FactoryCandidate`]s for an
//! implementation type: its constructors and any designated static factory
//! methods, each with declared parameter shapes and a produce closure.
//! [`select_factory`] applies the discovery policy and returns exactly one
//! candidate or an ambiguity error.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::dependency::{Declared, Provenance, ServiceDependency};
use crate::errors::{DeclarationError, FactoryError};
use crate::runtime::ResolveContext;

/// What a producer returns: the constructed service, or an arbitrary cause
/// that the runtime wraps into a `ConstructionError`.
pub type ProducerResult =
    Result<Arc<dyn Any + Send + Sync>, Box<dyn std::error::Error + Send + Sync + 'static>>;

/// The construction function of one service. Receives a context exposing
/// the node's resolved dependency slots.
#[derive(Clone)]
pub struct Producer(Arc<dyn Fn(&ResolveContext<'_>) -> ProducerResult + Send + Sync>);

impl Producer {
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn(&ResolveContext<'_>) -> ProducerResult + Send + Sync + 'static,
    {
        Self(Arc::new(produce))
    }

    /// A producer that always hands out clones of a pre-built instance.
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        let shared: Arc<dyn Any + Send + Sync> = Arc::new(value);
        Self::new(move |_| Ok(shared.clone()))
    }

    pub fn produce(&self, ctx: &ResolveContext<'_>) -> ProducerResult {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Producer")
    }
}

/// The kind of executable a candidate stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A static method explicitly designated as the factory.
    DesignatedMethod,
    /// A constructor explicitly designated as the factory.
    DesignatedConstructor,
    /// An undesignated constructor.
    Constructor,
}

/// One constructor or static factory method discovered on an
/// implementation type.
#[derive(Debug, Clone)]
pub struct FactoryCandidate {
    name: String,
    kind: CandidateKind,
    parameters: Vec<Declared>,
    returns_unit: bool,
    returns_optional: bool,
    producer: Producer,
}

impl FactoryCandidate {
    pub fn new(
        name: impl Into<String>,
        kind: CandidateKind,
        parameters: Vec<Declared>,
        producer: Producer,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters,
            returns_unit: false,
            returns_optional: false,
            producer,
        }
    }

    pub fn returning_unit(mut self) -> Self {
        self.returns_unit = true;
        self
    }

    pub fn returning_optional(mut self) -> Self {
        self.returns_optional = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Extract the dependency list from the candidate's parameter shapes.
    pub fn dependencies(
        &self,
        declaring_type: &str,
    ) -> Result<Vec<ServiceDependency>, DeclarationError> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(index, declared)| {
                ServiceDependency::from_declared(
                    declared.clone(),
                    Provenance::parameter(declaring_type, &self.name, index),
                )
            })
            .collect()
    }

    fn validate_designated_method(&self) -> Result<(), DeclarationError> {
        if self.returns_unit {
            return Err(DeclarationError::UnitFactoryReturn {
                name: self.name.clone(),
            });
        }
        if self.returns_optional {
            return Err(DeclarationError::OptionalFactoryReturn {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Pick the unique factory for `type_name` among `candidates`.
///
/// Policy, in order: exactly one designated static method wins; otherwise a
/// sole constructor wins; otherwise exactly one designated constructor
/// wins; otherwise the constructor with the strictly greatest parameter
/// count wins, provided it is unique. Every ambiguity fails.
pub fn select_factory(
    type_name: &str,
    candidates: &[FactoryCandidate],
) -> Result<FactoryCandidate, FactoryError> {
    if candidates.is_empty() {
        return Err(FactoryError::NoCandidates {
            type_name: type_name.to_string(),
        });
    }

    let methods: Vec<&FactoryCandidate> = candidates
        .iter()
        .filter(|c| c.kind == CandidateKind::DesignatedMethod)
        .collect();
    match methods.as_slice() {
        [] => {}
        [only] => {
            only.validate_designated_method()?;
            return Ok((*only).clone());
        }
        many => {
            return Err(FactoryError::Ambiguous {
                type_name: type_name.to_string(),
                reason: format!("{} designated static factory methods", many.len()),
            });
        }
    }

    let constructors: Vec<&FactoryCandidate> = candidates
        .iter()
        .filter(|c| c.kind != CandidateKind::DesignatedMethod)
        .collect();
    if let [only] = constructors.as_slice() {
        return Ok((*only).clone());
    }

    let designated: Vec<&FactoryCandidate> = constructors
        .iter()
        .copied()
        .filter(|c| c.kind == CandidateKind::DesignatedConstructor)
        .collect();
    match designated.as_slice() {
        [only] => return Ok((*only).clone()),
        [] => {}
        many => {
            return Err(FactoryError::Ambiguous {
                type_name: type_name.to_string(),
                reason: format!("{} designated constructors", many.len()),
            });
        }
    }

    // No designation at all: the strictly widest constructor wins.
    let max = constructors
        .iter()
        .map(|c| c.parameter_count())
        .max()
        .unwrap_or(0);
    let widest: Vec<&FactoryCandidate> = constructors
        .iter()
        .copied()
        .filter(|c| c.parameter_count() == max)
        .collect();
    match widest.as_slice() {
        [only] => Ok((*only).clone()),
        many => Err(FactoryError::Ambiguous {
            type_name: type_name.to_string(),
            reason: format!("{} constructors tied at {max} parameter(s)", many.len()),
        }),
    }
}
