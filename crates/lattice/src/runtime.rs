//! Instantiation runtime for a valid graph.
//!
//! Singleton values exist before the graph is handed out, so reading them
//! needs no synchronization beyond the cell's short critical section. Lazy
//! nodes memoize through a tri-state cell: the first accessor constructs
//! while holding the node's lock, concurrent accessors block on the
//! condvar, and a failed construction is recorded permanently so every
//! waiter and every later caller observes the same error. Prototype nodes
//! run the full construction path on every request.

use std::any::{type_name, Any};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::dependency::{ResolvedValue, ServiceDependency};
use crate::errors::{ConstructionError, ResolveError};
use crate::graph::{DependencyLink, GraphNode, ServiceGraph};
use crate::key::Key;
use crate::node::{InstantiationMode, ServiceDescriptor};

/// Memoization state of one singleton or lazy node.
#[derive(Debug)]
enum CellState {
    Empty,
    /// Construction running on the recorded thread. A resolve re-entering
    /// from that same thread is a dynamic cycle, not a reason to wait.
    InProgress(ThreadId),
    Done(Arc<dyn Any + Send + Sync>),
    /// Terminal: construction failed once; the error is replayed to every
    /// caller instead of silently retrying into divergent results.
    Failed(ConstructionError),
}

#[derive(Debug)]
pub(crate) struct MemoCell {
    state: Mutex<CellState>,
    ready: Condvar,
}

impl MemoCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Empty),
            ready: Condvar::new(),
        }
    }
}

impl ServiceGraph {
    /// Resolve and downcast a service, `Ok(None)` when the key is not
    /// registered in this scope or any ancestor.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        key: &Key,
    ) -> Result<Option<Arc<T>>, ResolveError> {
        match self.resolve_any(key)? {
            Some(value) => downcast::<T>(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve a service that must be present.
    pub fn require<T: Send + Sync + 'static>(&self, key: &Key) -> Result<Arc<T>, ResolveError> {
        self.get::<T>(key)?
            .ok_or_else(|| ResolveError::NotFound { key: key.clone() })
    }

    /// Lazy sequence of descriptors for every locally registered service.
    /// Read-only; safe to call from any thread.
    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        self.nodes.values().map(|gn| ServiceDescriptor::of(&gn.node))
    }

    fn resolve_any(
        &self,
        key: &Key,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>, ResolveError> {
        if let Some(graph_node) = self.nodes.get(key) {
            return self.resolve_graph_node(graph_node).map(Some);
        }
        match &self.parent {
            Some(parent) => parent.resolve_any(key),
            None => Ok(None),
        }
    }

    pub(crate) fn resolve_graph_node(
        &self,
        graph_node: &GraphNode,
    ) -> Result<Arc<dyn Any + Send + Sync>, ResolveError> {
        match graph_node.node.mode() {
            InstantiationMode::Prototype => {
                debug!(key = %graph_node.node.key(), "constructing prototype");
                self.run_producer(graph_node)
            }
            InstantiationMode::Singleton | InstantiationMode::Lazy => {
                self.memoized(graph_node)
            }
        }
    }

    /// First-access-blocking memoization. At most one producer invocation
    /// ever happens per cell, success or failure.
    fn memoized(
        &self,
        graph_node: &GraphNode,
    ) -> Result<Arc<dyn Any + Send + Sync>, ResolveError> {
        let key = graph_node.node.key();
        let current = thread::current().id();
        let cell = &graph_node.cell;

        {
            let mut state = cell.state.lock();
            loop {
                match &*state {
                    CellState::Done(value) => return Ok(value.clone()),
                    CellState::Failed(err) => return Err(err.clone().into()),
                    CellState::InProgress(owner) if *owner == current => {
                        error!(key = %key, "construction requested itself");
                        return Err(ResolveError::CyclicConstruction { key: key.clone() });
                    }
                    CellState::InProgress(_) => cell.ready.wait(&mut state),
                    CellState::Empty => {
                        *state = CellState::InProgress(current);
                        break;
                    }
                }
            }
        }

        debug!(key = %key, mode = %graph_node.node.mode(), "first-access construction");
        let produced = self.run_producer(graph_node);

        let mut state = cell.state.lock();
        let result = match produced {
            Ok(value) => {
                *state = CellState::Done(value.clone());
                Ok(value)
            }
            Err(err) => {
                let construction = match err {
                    ResolveError::Construction(c) => c,
                    other => ConstructionError::new(key.to_string(), Box::new(other)),
                };
                error!(key = %key, error = %construction, "construction failed");
                *state = CellState::Failed(construction.clone());
                Err(construction.into())
            }
        };
        cell.ready.notify_all();
        result
    }

    fn run_producer(
        &self,
        graph_node: &GraphNode,
    ) -> Result<Arc<dyn Any + Send + Sync>, ResolveError> {
        let ctx = ResolveContext {
            graph: self,
            node: graph_node,
        };
        graph_node.node.producer().produce(&ctx).map_err(|cause| {
            ConstructionError::new(graph_node.node.key().to_string(), cause).into()
        })
    }
}

/// Per-construction view handed to a producer: the node under construction
/// and typed access to its resolved dependency slots, index-aligned with
/// the declared dependency list.
pub struct ResolveContext<'a> {
    graph: &'a ServiceGraph,
    node: &'a GraphNode,
}

impl ResolveContext<'_> {
    /// Key of the service currently being constructed.
    pub fn key(&self) -> &Key {
        self.node.node.key()
    }

    /// Resolve dependency slot `index` to a present value or its empty
    /// substitute.
    pub fn slot(&self, index: usize) -> Result<ResolvedValue, ResolveError> {
        let dep = self.dependency(index)?;
        match &self.node.links[index] {
            DependencyLink::Local(key) => {
                let graph_node = self
                    .graph
                    .nodes
                    .get(key)
                    .expect("local link points at a registered node");
                let value = self.graph.resolve_graph_node(graph_node)?;
                Ok(dep.wrap_if_optional(value)?)
            }
            DependencyLink::Inherited(key) => {
                let parent = self
                    .graph
                    .parent
                    .as_ref()
                    .expect("inherited link implies a parent scope");
                let value = parent
                    .resolve_any(key)?
                    .ok_or_else(|| ResolveError::NotFound { key: key.clone() })?;
                Ok(dep.wrap_if_optional(value)?)
            }
            DependencyLink::Unbound => Ok(dep.empty_value()?),
        }
    }

    /// Typed access to a required slot.
    pub fn require_slot<T: Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Arc<T>, ResolveError> {
        let dep = self.dependency(index)?;
        let key = dep.key().clone();
        match self.slot(index)? {
            ResolvedValue::Present(value) => downcast::<T>(&key, value),
            ResolvedValue::Empty => Err(ResolveError::NotFound { key }),
        }
    }

    /// Typed access to an optional or nullable slot.
    pub fn optional_slot<T: Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<Option<Arc<T>>, ResolveError> {
        let dep = self.dependency(index)?;
        let key = dep.key().clone();
        match self.slot(index)? {
            ResolvedValue::Present(value) => downcast::<T>(&key, value).map(Some),
            ResolvedValue::Empty => Ok(None),
        }
    }

    fn dependency(&self, index: usize) -> Result<&ServiceDependency, ResolveError> {
        self.node
            .node
            .dependencies()
            .get(index)
            .ok_or_else(|| ResolveError::UnknownSlot {
                key: self.node.node.key().clone(),
                index,
            })
    }
}

fn downcast<T: Send + Sync + 'static>(
    key: &Key,
    value: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<T>, ResolveError> {
    value
        .downcast::<T>()
        .map_err(|_| ResolveError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::{Declared, Provenance};
    use crate::factory::Producer;
    use crate::graph::GraphBuilder;
    use crate::node::Registration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key<T: Send + Sync + 'static>() -> Key {
        Key::of::<T>().expect("key")
    }

    #[derive(Debug)]
    struct Repo {
        url: Arc<String>,
    }

    #[test]
    fn producer_reads_required_slot() {
        let dep = ServiceDependency::from_declared(
            Declared::plain::<String>(),
            Provenance::parameter("Repo", "new", 0),
        )
        .expect("dependency");

        let graph = GraphBuilder::new()
            .register_instance(key::<String>(), "postgres://db".to_string())
            .register(Registration::factory(
                key::<Repo>(),
                InstantiationMode::Lazy,
                vec![dep],
                Producer::new(|ctx| {
                    let url = ctx.require_slot::<String>(0)?;
                    Ok(Arc::new(Repo { url }) as Arc<dyn Any + Send + Sync>)
                }),
            ))
            .build()
            .expect("graph");

        let repo = graph.require::<Repo>(&key::<Repo>()).expect("repo");
        assert_eq!(repo.url.as_str(), "postgres://db");
    }

    #[test]
    fn unbound_optional_slot_resolves_to_none() {
        let dep = ServiceDependency::from_declared(
            Declared::optional::<u32>(),
            Provenance::parameter("Repo", "new", 0),
        )
        .expect("dependency");

        let graph = GraphBuilder::new()
            .register(Registration::factory(
                key::<Repo>(),
                InstantiationMode::Lazy,
                vec![dep],
                Producer::new(|ctx| {
                    let limit = ctx.optional_slot::<u32>(0)?;
                    assert!(limit.is_none());
                    Ok(Arc::new(Repo {
                        url: Arc::new(String::new()),
                    }) as Arc<dyn Any + Send + Sync>)
                }),
            ))
            .build()
            .expect("graph");

        assert!(graph.require::<Repo>(&key::<Repo>()).is_ok());
    }

    #[test]
    fn singleton_producer_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_producer = calls.clone();

        let graph = GraphBuilder::new()
            .register(Registration::factory(
                key::<u64>(),
                InstantiationMode::Singleton,
                vec![],
                Producer::new(move |_| {
                    calls_in_producer.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(99u64) as Arc<dyn Any + Send + Sync>)
                }),
            ))
            .build()
            .expect("graph");

        // Constructed eagerly at build; requests never re-invoke.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for _ in 0..5 {
            let value = graph.require::<u64>(&key::<u64>()).expect("value");
            assert_eq!(*value, 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prototype_is_fresh_on_every_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_producer = calls.clone();

        let graph = GraphBuilder::new()
            .register(Registration::factory(
                key::<u64>(),
                InstantiationMode::Prototype,
                vec![],
                Producer::new(move |_| {
                    let n = calls_in_producer.fetch_add(1, Ordering::SeqCst) as u64;
                    Ok(Arc::new(n) as Arc<dyn Any + Send + Sync>)
                }),
            ))
            .build()
            .expect("graph");

        let first = graph.require::<u64>(&key::<u64>()).expect("value");
        let second = graph.require::<u64>(&key::<u64>()).expect("value");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(*first, *second);
    }

    #[test]
    fn missing_key_is_none_for_get_and_error_for_require() {
        let graph = GraphBuilder::new()
            .register_instance(key::<String>(), "x".to_string())
            .build()
            .expect("graph");

        assert!(graph.get::<u32>(&key::<u32>()).expect("lookup").is_none());
        assert!(matches!(
            graph.require::<u32>(&key::<u32>()),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn requested_type_must_match_stored_type() {
        let graph = GraphBuilder::new()
            .register_instance(key::<String>(), "x".to_string())
            .build()
            .expect("graph");

        assert!(matches!(
            graph.get::<u32>(&key::<String>()),
            Err(ResolveError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn resolution_walks_the_ancestor_chain() {
        let root = GraphBuilder::new()
            .register_instance(key::<String>(), "root".to_string())
            .build()
            .expect("root");
        let mid = GraphBuilder::with_parent(root).build().expect("mid");
        let leaf = GraphBuilder::with_parent(mid).build().expect("leaf");

        let value = leaf.require::<String>(&key::<String>()).expect("value");
        assert_eq!(value.as_str(), "root");
    }

    #[test]
    fn services_lists_descriptors() {
        let graph = GraphBuilder::new()
            .register_instance(key::<String>(), "x".to_string())
            .register(Registration::factory(
                key::<u64>(),
                InstantiationMode::Lazy,
                vec![],
                Producer::new(|_| Ok(Arc::new(1u64) as Arc<dyn Any + Send + Sync>)),
            ))
            .build()
            .expect("graph");

        let mut descriptors: Vec<ServiceDescriptor> = graph.services().collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors
            .iter()
            .any(|d| d.mode == InstantiationMode::Lazy));
    }
}
