//! Per-type factory/dependency metadata, memoized per registry.
//!
//! The cache is owned by whoever builds graphs, not by a process-wide
//! global: its lifetime ends with its owner. Computing metadata runs the
//! factory selection policy once per type and extracts the dependency list
//! from the chosen candidate.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::dependency::ServiceDependency;
use crate::factory::{select_factory, FactoryCandidate, Producer};
use crate::errors::FactoryError;

/// Everything a scanner reports about one implementation type: its
/// identity and the factory candidates found on it.
#[derive(Debug, Clone)]
pub struct TypeModel {
    type_id: TypeId,
    type_name: &'static str,
    candidates: Vec<FactoryCandidate>,
}

impl TypeModel {
    pub fn of<T: Send + Sync + 'static>(candidates: Vec<FactoryCandidate>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            candidates,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// The selected producer and extracted dependency list of one type.
/// Computed once, never mutated.
#[derive(Debug)]
pub struct TypeMetadata {
    producer: Producer,
    dependencies: Vec<ServiceDependency>,
}

impl TypeMetadata {
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }
}

/// Concurrent `TypeId -> TypeMetadata` map with compute-once semantics.
#[derive(Debug, Default)]
pub struct MetadataCache {
    inner: RwLock<HashMap<TypeId, Arc<TypeMetadata>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the metadata for a type, computing and caching it on first
    /// request. Failures are not cached; a corrected model recomputes.
    pub fn resolve(&self, model: &TypeModel) -> Result<Arc<TypeMetadata>, FactoryError> {
        if let Some(found) = self.inner.read().get(&model.type_id) {
            return Ok(found.clone());
        }

        let candidate = select_factory(model.type_name, &model.candidates)?;
        let dependencies = candidate.dependencies(model.type_name)?;
        debug!(
            type_name = model.type_name,
            factory = candidate.name(),
            dependencies = dependencies.len(),
            "selected factory"
        );
        let metadata = Arc::new(TypeMetadata {
            producer: candidate.producer().clone(),
            dependencies,
        });

        let mut cache = self.inner.write();
        // A racing thread may have filled the slot; keep the first entry so
        // every caller observes one metadata instance.
        Ok(cache
            .entry(model.type_id)
            .or_insert_with(|| metadata)
            .clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Declared;
    use crate::factory::CandidateKind;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Widget;

    fn counted_model(counter: Arc<AtomicUsize>) -> TypeModel {
        let producer = Producer::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Widget) as Arc<dyn Any + Send + Sync>)
        });
        TypeModel::of::<Widget>(vec![FactoryCandidate::new(
            "new",
            CandidateKind::Constructor,
            vec![Declared::plain::<u32>()],
            producer,
        )])
    }

    #[test]
    fn metadata_is_computed_once_per_type() {
        let cache = MetadataCache::new();
        let model = counted_model(Arc::new(AtomicUsize::new(0)));

        let first = cache.resolve(&model).expect("metadata");
        let second = cache.resolve(&model).expect("metadata");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.dependencies().len(), 1);
    }

    #[test]
    fn selection_failures_are_not_cached() {
        let cache = MetadataCache::new();
        let bad = TypeModel::of::<Widget>(vec![]);
        assert!(cache.resolve(&bad).is_err());
        assert!(cache.is_empty());

        let good = counted_model(Arc::new(AtomicUsize::new(0)));
        assert!(cache.resolve(&good).is_ok());
        assert_eq!(cache.len(), 1);
    }
}
