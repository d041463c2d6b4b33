//! Service registry and dependency-graph resolution engine.
//!
//! Callers register producers tagged with a [`Key`] and an
//! [`InstantiationMode`]; [`GraphBuilder`] links every declared dependency
//! to a sibling or ancestor node, rejects duplicates, unresolved
//! requirements and cycles in one aggregated report, and orders
//! construction so dependencies exist before their consumers. A valid
//! [`ServiceGraph`] then serves reads from any thread: singletons are
//! built eagerly at finalize time, lazy services memoize their first
//! access with blocking for concurrent callers, prototypes are rebuilt on
//! every request.
//!
//! ```
//! use lattice::{GraphBuilder, InstantiationMode, Key, Producer, Registration};
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Greeter { prefix: Arc<String> }
//!
//! let graph = GraphBuilder::new()
//!     .register_instance(Key::of::<String>()?, "hello".to_string())
//!     .register(Registration::factory(
//!         Key::of::<Greeter>()?,
//!         InstantiationMode::Lazy,
//!         vec![lattice::ServiceDependency::required(Key::of::<String>()?)],
//!         Producer::new(|ctx| {
//!             let prefix = ctx.require_slot::<String>(0)?;
//!             Ok(Arc::new(Greeter { prefix }) as Arc<dyn Any + Send + Sync>)
//!         }),
//!     ))
//!     .build()
//!     .expect("valid graph");
//!
//! let greeter = graph.require::<Greeter>(&Key::of::<Greeter>()?)?;
//! assert_eq!(greeter.prefix.as_str(), "hello");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod contract;
pub mod dependency;
pub mod errors;
pub mod factory;
pub mod graph;
pub mod key;
pub mod metadata;
pub mod node;
pub mod runtime;

pub use contract::{ContractBuilder, ServiceContract};
pub use dependency::{Declared, OptionalKind, Provenance, ResolvedValue, ServiceDependency};
pub use errors::{
    BuildError, ConstructionError, ContractError, DeclarationError, DependencyError,
    FactoryError, GraphBuildFailure, KeyError, ResolveError,
};
pub use factory::{select_factory, CandidateKind, FactoryCandidate, Producer, ProducerResult};
pub use graph::{GraphBuilder, GraphState, ServiceGraph};
pub use key::{Key, Qualifier};
pub use metadata::{MetadataCache, TypeMetadata, TypeModel};
pub use node::{InstantiationMode, Registration, ServiceDescriptor, ServiceNode};
pub use runtime::ResolveContext;
