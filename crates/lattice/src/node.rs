//! Service nodes and the registrations that create them.

use std::fmt;

use serde::Serialize;

use crate::dependency::ServiceDependency;
use crate::factory::Producer;
use crate::key::Key;

/// When and how often a node's producer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstantiationMode {
    /// Built exactly once, eagerly, when the graph becomes valid.
    Singleton,
    /// Built exactly once, on first access; concurrent first accessors
    /// block until the value exists.
    Lazy,
    /// Built fresh on every access; never memoized.
    Prototype,
}

impl fmt::Display for InstantiationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstantiationMode::Singleton => "singleton",
            InstantiationMode::Lazy => "lazy",
            InstantiationMode::Prototype => "prototype",
        };
        f.write_str(name)
    }
}

/// A resolvable provider of a service for one key: instantiation mode,
/// unresolved dependency list, and the producer that builds the value.
#[derive(Debug, Clone)]
pub struct ServiceNode {
    key: Key,
    mode: InstantiationMode,
    dependencies: Vec<ServiceDependency>,
    producer: Producer,
}

impl ServiceNode {
    pub fn new(
        key: Key,
        mode: InstantiationMode,
        dependencies: Vec<ServiceDependency>,
        producer: Producer,
    ) -> Self {
        Self {
            key,
            mode,
            dependencies,
            producer,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn mode(&self) -> InstantiationMode {
        self.mode
    }

    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }
}

/// One raw registration handed to the graph builder. Exactly one node per
/// registration; key uniqueness within a scope is enforced at build time.
#[derive(Debug, Clone)]
pub struct Registration {
    node: ServiceNode,
}

impl Registration {
    /// Register a producer with an explicit dependency list.
    pub fn factory(
        key: Key,
        mode: InstantiationMode,
        dependencies: Vec<ServiceDependency>,
        producer: Producer,
    ) -> Self {
        Self {
            node: ServiceNode::new(key, mode, dependencies, producer),
        }
    }

    /// Register a pre-built instance. Always a singleton with no
    /// dependencies.
    pub fn instance<T: Send + Sync + 'static>(key: Key, value: T) -> Self {
        Self {
            node: ServiceNode::new(
                key,
                InstantiationMode::Singleton,
                Vec::new(),
                Producer::instance(value),
            ),
        }
    }

    pub(crate) fn into_node(self) -> ServiceNode {
        self.node
    }

    pub fn key(&self) -> &Key {
        &self.node.key
    }

    pub fn mode(&self) -> InstantiationMode {
        self.node.mode
    }
}

/// Read-only description of a node, surfaced by the runtime query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub key: Key,
    pub mode: InstantiationMode,
    pub dependency_count: usize,
}

impl ServiceDescriptor {
    pub(crate) fn of(node: &ServiceNode) -> Self {
        Self {
            key: node.key.clone(),
            mode: node.mode,
            dependency_count: node.dependencies.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_registration_is_singleton_with_no_dependencies() {
        let key = Key::of::<String>().expect("key");
        let reg = Registration::instance(key.clone(), "config".to_string());
        assert_eq!(reg.key(), &key);
        assert_eq!(reg.mode(), InstantiationMode::Singleton);
        assert!(reg.into_node().dependencies().is_empty());
    }

    #[test]
    fn descriptor_reflects_node_shape() {
        let key = Key::of::<u32>().expect("key");
        let dep = ServiceDependency::required(Key::of::<String>().expect("key"));
        let node = ServiceNode::new(
            key.clone(),
            InstantiationMode::Lazy,
            vec![dep],
            Producer::instance(7u32),
        );
        let descriptor = ServiceDescriptor::of(&node);
        assert_eq!(descriptor.key, key);
        assert_eq!(descriptor.mode, InstantiationMode::Lazy);
        assert_eq!(descriptor.dependency_count, 1);
    }
}
