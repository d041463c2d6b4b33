//! Graph construction and validation.
//!
//! `GraphBuilder` collects raw registrations for one scope and, at build
//! time, runs the full pipeline: duplicate detection, dependency linking
//! against the local scope and the ancestor chain, cycle detection,
//! topological ordering, export validation, contract derivation, and eager
//! singleton construction. Every independent problem is collected; on any
//! failure the caller receives the aggregated list and no graph.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contract::{ContractBuilder, ServiceContract};
use crate::dependency::OptionalKind;
use crate::errors::{BuildError, FactoryError, GraphBuildFailure, ResolveError};
use crate::key::Key;
use crate::metadata::{MetadataCache, TypeModel};
use crate::node::{InstantiationMode, Registration, ServiceNode};
use crate::runtime::MemoCell;

/// Lifecycle of one graph build. Terminal states are immutable: a failed
/// build never yields a partial graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    Building,
    Validating,
    Valid,
    Failed,
}

/// Where one dependency slot is bound.
#[derive(Debug, Clone)]
pub(crate) enum DependencyLink {
    /// Provider registered in this scope.
    Local(Key),
    /// Provider found in an ancestor scope.
    Inherited(Key),
    /// No provider; only permitted for non-required slots, which
    /// substitute their empty value at runtime.
    Unbound,
}

/// A node plus its resolved links and runtime memoization cell. Links are
/// index-aligned with the node's dependency list.
#[derive(Debug)]
pub(crate) struct GraphNode {
    pub(crate) node: ServiceNode,
    pub(crate) links: Vec<DependencyLink>,
    pub(crate) cell: MemoCell,
}

/// Accumulates registrations for one scope.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    registrations: Vec<Registration>,
    exports: Vec<Key>,
    required_keys: Vec<Key>,
    optional_keys: Vec<Key>,
    parent: Option<Arc<ServiceGraph>>,
    metadata: MetadataCache,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope of an already-valid parent graph; unresolved local
    /// dependencies fall back to the ancestor chain.
    pub fn with_parent(parent: Arc<ServiceGraph>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn register(mut self, registration: Registration) -> Self {
        debug!(key = %registration.key(), mode = %registration.mode(), "registering producer");
        self.registrations.push(registration);
        self
    }

    pub fn register_instance<T: Send + Sync + 'static>(self, key: Key, value: T) -> Self {
        self.register(Registration::instance(key, value))
    }

    /// Register an implementation type: its factory is selected and its
    /// dependency list extracted through the builder-owned metadata cache.
    pub fn register_type(
        mut self,
        key: Key,
        mode: InstantiationMode,
        model: &TypeModel,
    ) -> Result<Self, FactoryError> {
        let metadata = self.metadata.resolve(model)?;
        self.registrations.push(Registration::factory(
            key,
            mode,
            metadata.dependencies().to_vec(),
            metadata.producer().clone(),
        ));
        Ok(self)
    }

    /// Mark a key for export: it must resolve to a local node at build
    /// time, and it becomes part of the contract's provided set.
    pub fn export(mut self, key: Key) -> Self {
        self.exports.push(key);
        self
    }

    /// Declare a key this scope requires from its environment.
    pub fn require(mut self, key: Key) -> Self {
        self.required_keys.push(key);
        self
    }

    /// Declare a key this scope can use but does not need.
    pub fn optional(mut self, key: Key) -> Self {
        self.optional_keys.push(key);
        self
    }

    /// Run the whole pipeline. On success singletons are already
    /// constructed, in dependency order, before the graph is returned.
    pub fn build(self) -> Result<Arc<ServiceGraph>, GraphBuildFailure> {
        let GraphBuilder {
            registrations,
            exports,
            required_keys,
            optional_keys,
            parent,
            metadata: _,
        } = self;

        let mut errors: Vec<BuildError> = Vec::new();
        debug!(registrations = registrations.len(), "graph build: collecting");

        // Collect. Duplicates fail the build; the first registration is
        // kept only so the remaining phases can still report their own
        // findings.
        let mut nodes: HashMap<Key, ServiceNode> = HashMap::new();
        for registration in registrations {
            let node = registration.into_node();
            if nodes.contains_key(node.key()) {
                warn!(key = %node.key(), "duplicate registration");
                errors.push(BuildError::DuplicateService {
                    key: node.key().clone(),
                });
                continue;
            }
            nodes.insert(node.key().clone(), node);
        }

        debug!(nodes = nodes.len(), "graph build: linking");
        let mut links: HashMap<Key, Vec<DependencyLink>> = HashMap::new();
        for node in nodes.values() {
            let mut node_links = Vec::with_capacity(node.dependencies().len());
            for dep in node.dependencies() {
                let link = if nodes.contains_key(dep.key()) {
                    DependencyLink::Local(dep.key().clone())
                } else if ancestor_provides(parent.as_deref(), dep.key()) {
                    DependencyLink::Inherited(dep.key().clone())
                } else if dep.optional_kind().is_required() {
                    errors.push(BuildError::UnresolvedDependency {
                        key: dep.key().clone(),
                        requested_by: node.key().clone(),
                    });
                    DependencyLink::Unbound
                } else {
                    DependencyLink::Unbound
                };
                node_links.push(link);
            }
            links.insert(node.key().clone(), node_links);
        }

        // Cycle detection runs over every locally bound edge, optional ones
        // included: a cycle through an optional-but-bound dependency can
        // never be constructed either.
        debug!("graph build: cycle detection");
        let edges = local_edges(&links);
        let cycles = detect_cycles(&edges);
        let has_cycles = !cycles.is_empty();
        for path in cycles {
            errors.push(BuildError::CyclicDependency { path });
        }

        let order = if has_cycles {
            Vec::new()
        } else {
            topological_order(&edges)
        };

        for key in &exports {
            if !nodes.contains_key(key) {
                errors.push(BuildError::ExportResolution { key: key.clone() });
            }
        }

        let contract = match derive_contract(
            &nodes,
            &links,
            &exports,
            &required_keys,
            &optional_keys,
        ) {
            Ok(contract) => Some(contract),
            Err(contract_error) => {
                errors.push(BuildError::Contract(contract_error));
                None
            }
        };

        if !errors.is_empty() {
            warn!(errors = errors.len(), "graph build failed");
            return Err(GraphBuildFailure::new(errors));
        }
        let contract = contract.expect("contract present when no errors were recorded");

        let graph = Arc::new(ServiceGraph {
            nodes: nodes
                .into_iter()
                .map(|(key, node)| {
                    let node_links = links.remove(&key).unwrap_or_default();
                    (
                        key,
                        Arc::new(GraphNode {
                            node,
                            links: node_links,
                            cell: MemoCell::new(),
                        }),
                    )
                })
                .collect(),
            order,
            exports: exports.into_iter().collect(),
            parent,
            contract,
        });

        // Eager pass: singletons in topological order, so every node's
        // dependencies exist before the node itself.
        for key in &graph.order {
            let graph_node = graph.nodes.get(key).expect("ordered key is registered");
            if graph_node.node.mode() != InstantiationMode::Singleton {
                continue;
            }
            debug!(key = %key, "eagerly constructing singleton");
            if let Err(err) = graph.resolve_graph_node(graph_node) {
                let source = match err {
                    ResolveError::Construction(c) => c,
                    other => crate::errors::ConstructionError::new(
                        key.to_string(),
                        Box::new(other),
                    ),
                };
                return Err(GraphBuildFailure::new(vec![BuildError::Construction {
                    key: key.clone(),
                    source,
                }]));
            }
        }

        info!(
            nodes = graph.nodes.len(),
            exports = graph.exports.len(),
            "service graph valid"
        );
        Ok(graph)
    }
}

fn ancestor_provides(mut parent: Option<&ServiceGraph>, key: &Key) -> bool {
    while let Some(graph) = parent {
        if graph.nodes.contains_key(key) {
            return true;
        }
        parent = graph.parent.as_deref();
    }
    false
}

fn local_edges(links: &HashMap<Key, Vec<DependencyLink>>) -> HashMap<Key, Vec<Key>> {
    links
        .iter()
        .map(|(key, node_links)| {
            let targets = node_links
                .iter()
                .filter_map(|link| match link {
                    DependencyLink::Local(target) => Some(target.clone()),
                    _ => None,
                })
                .collect();
            (key.clone(), targets)
        })
        .collect()
}

/// Depth-first cycle search. Each reported path is ordered and closed: the
/// entry node of the cycle appears first and again last.
fn detect_cycles(edges: &HashMap<Key, Vec<Key>>) -> Vec<Vec<Key>> {
    let mut roots: Vec<&Key> = edges.keys().collect();
    roots.sort();

    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();
    for root in roots {
        if !visited.contains(root) {
            cycle_dfs(root, edges, &mut visited, &mut on_stack, &mut path, &mut cycles);
        }
    }
    cycles
}

fn cycle_dfs(
    node: &Key,
    edges: &HashMap<Key, Vec<Key>>,
    visited: &mut HashSet<Key>,
    on_stack: &mut HashSet<Key>,
    path: &mut Vec<Key>,
    cycles: &mut Vec<Vec<Key>>,
) {
    visited.insert(node.clone());
    on_stack.insert(node.clone());
    path.push(node.clone());

    if let Some(targets) = edges.get(node) {
        for target in targets {
            if !visited.contains(target) {
                cycle_dfs(target, edges, visited, on_stack, path, cycles);
            } else if on_stack.contains(target) {
                let start = path
                    .iter()
                    .position(|k| k == target)
                    .expect("back-edge target is on the current path");
                let mut cycle: Vec<Key> = path[start..].to_vec();
                cycle.push(target.clone());
                cycles.push(cycle);
            }
        }
    }

    path.pop();
    on_stack.remove(node);
}

/// Postorder over the acyclic edge set: a node's dependencies come before
/// the node itself. Roots are visited in key order for determinism.
fn topological_order(edges: &HashMap<Key, Vec<Key>>) -> Vec<Key> {
    let mut roots: Vec<&Key> = edges.keys().collect();
    roots.sort();

    let mut order = Vec::with_capacity(edges.len());
    let mut visited = HashSet::new();
    for root in roots {
        order_dfs(root, edges, &mut visited, &mut order);
    }
    order
}

fn order_dfs(node: &Key, edges: &HashMap<Key, Vec<Key>>, visited: &mut HashSet<Key>, order: &mut Vec<Key>) {
    if !visited.insert(node.clone()) {
        return;
    }
    if let Some(targets) = edges.get(node) {
        for target in targets {
            order_dfs(target, edges, visited, order);
        }
    }
    order.push(node.clone());
}

fn derive_contract(
    nodes: &HashMap<Key, ServiceNode>,
    links: &HashMap<Key, Vec<DependencyLink>>,
    exports: &[Key],
    required_keys: &[Key],
    optional_keys: &[Key],
) -> Result<ServiceContract, crate::errors::ContractError> {
    let mut builder = ContractBuilder::new();

    if exports.is_empty() {
        for key in nodes.keys() {
            builder = builder.provided(key.clone());
        }
    } else {
        for key in exports {
            builder = builder.provided(key.clone());
        }
    }

    for key in required_keys {
        builder = builder.required(key.clone());
    }
    for key in optional_keys {
        builder = builder.optional(key.clone());
    }

    // Dependencies not satisfied locally are part of what this scope asks
    // of its environment.
    for node in nodes.values() {
        let node_links = &links[node.key()];
        for (dep, link) in node.dependencies().iter().zip(node_links) {
            if matches!(link, DependencyLink::Local(_)) {
                continue;
            }
            builder = match dep.optional_kind() {
                OptionalKind::Required => builder.required(dep.key().clone()),
                OptionalKind::Wrapped | OptionalKind::Nullable => {
                    builder.optional(dep.key().clone())
                }
            };
        }
    }

    builder.build()
}

/// The validated node set of one scope. Immutable after build except for
/// the memoization state inside lazy cells; freely shared across threads.
#[derive(Debug)]
pub struct ServiceGraph {
    pub(crate) nodes: HashMap<Key, Arc<GraphNode>>,
    pub(crate) order: Vec<Key>,
    pub(crate) exports: BTreeSet<Key>,
    pub(crate) parent: Option<Arc<ServiceGraph>>,
    contract: ServiceContract,
}

impl ServiceGraph {
    /// A valid graph is, by construction, in its terminal state.
    pub fn state(&self) -> GraphState {
        GraphState::Valid
    }

    pub fn lookup(&self, key: &Key) -> Option<&ServiceNode> {
        self.nodes.get(key).map(|gn| &gn.node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ServiceNode> {
        self.nodes.values().map(|gn| &gn.node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    pub fn exports(&self) -> &BTreeSet<Key> {
        &self.exports
    }

    pub fn parent(&self) -> Option<&Arc<ServiceGraph>> {
        self.parent.as_ref()
    }

    /// Construction order computed at build time: dependencies first.
    pub fn construction_order(&self) -> &[Key] {
        &self.order
    }
}
