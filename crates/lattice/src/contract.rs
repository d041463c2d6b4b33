//! Derived key-set summary of a graph and revision compatibility checks.
//!
//! A contract never drives resolution. It is a value: three key sets
//! (required, optional, provided), derived once from a valid graph and
//! compared across revisions. Required and optional stay observable as
//! distinct sets; a key landing in both is surfaced at finalization
//! instead of being silently promoted either way.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::errors::ContractError;
use crate::key::Key;

/// `(requires, optional, provides)` — immutable, value-equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceContract {
    requires: BTreeSet<Key>,
    optional: BTreeSet<Key>,
    provides: BTreeSet<Key>,
}

impl ServiceContract {
    pub fn builder() -> ContractBuilder {
        ContractBuilder::new()
    }

    pub fn requires(&self) -> &BTreeSet<Key> {
        &self.requires
    }

    pub fn optional(&self) -> &BTreeSet<Key> {
        &self.optional
    }

    pub fn provides(&self) -> &BTreeSet<Key> {
        &self.provides
    }

    /// Check that `successor` can replace this revision without breaking
    /// consumers: nothing previously provided may disappear, and no
    /// requirement may appear that this revision did not already have.
    pub fn check_backward_compatible(
        &self,
        successor: &ServiceContract,
    ) -> Result<(), ContractError> {
        let lost_provides: Vec<Key> = self
            .provides
            .difference(&successor.provides)
            .cloned()
            .collect();
        let new_requires: Vec<Key> = successor
            .requires
            .difference(&self.requires)
            .cloned()
            .collect();

        if lost_provides.is_empty() && new_requires.is_empty() {
            Ok(())
        } else {
            Err(ContractError::Incompatible {
                lost_provides,
                new_requires,
            })
        }
    }
}

/// Accumulates the three key sets; `build` runs the finalization check.
#[derive(Debug, Default)]
pub struct ContractBuilder {
    requires: BTreeSet<Key>,
    optional: BTreeSet<Key>,
    provides: BTreeSet<Key>,
}

impl ContractBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: Key) -> Self {
        self.requires.insert(key);
        self
    }

    pub fn optional(mut self, key: Key) -> Self {
        self.optional.insert(key);
        self
    }

    pub fn provided(mut self, key: Key) -> Self {
        self.provides.insert(key);
        self
    }

    pub fn build(self) -> Result<ServiceContract, ContractError> {
        if let Some(key) = self.requires.intersection(&self.optional).next() {
            return Err(ContractError::RequiredAndOptional { key: key.clone() });
        }
        Ok(ServiceContract {
            requires: self.requires,
            optional: self.optional,
            provides: self.provides,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<T: Send + Sync + 'static>() -> Key {
        Key::of::<T>().expect("key")
    }

    fn contract(requires: Vec<Key>, optional: Vec<Key>, provides: Vec<Key>) -> ServiceContract {
        let mut builder = ContractBuilder::new();
        for k in requires {
            builder = builder.required(k);
        }
        for k in optional {
            builder = builder.optional(k);
        }
        for k in provides {
            builder = builder.provided(k);
        }
        builder.build().expect("contract")
    }

    #[test]
    fn contracts_are_value_equal() {
        let a = contract(vec![key::<u32>()], vec![], vec![key::<String>()]);
        let b = contract(vec![key::<u32>()], vec![], vec![key::<String>()]);
        assert_eq!(a, b);
    }

    #[test]
    fn required_and_optional_overlap_fails_finalization() {
        let err = ContractBuilder::new()
            .required(key::<u32>())
            .optional(key::<u32>())
            .build()
            .unwrap_err();
        assert!(matches!(err, ContractError::RequiredAndOptional { .. }));
    }

    #[test]
    fn identical_revision_is_compatible() {
        let a = contract(vec![key::<u32>()], vec![key::<u8>()], vec![key::<String>()]);
        assert!(a.check_backward_compatible(&a.clone()).is_ok());
    }

    #[test]
    fn widening_provides_is_compatible() {
        let old = contract(vec![], vec![], vec![key::<String>()]);
        let new = contract(vec![], vec![], vec![key::<String>(), key::<u64>()]);
        assert!(old.check_backward_compatible(&new).is_ok());
    }

    #[test]
    fn losing_a_provided_key_is_incompatible() {
        let old = contract(vec![], vec![], vec![key::<String>(), key::<u64>()]);
        let new = contract(vec![], vec![], vec![key::<String>()]);
        let err = old.check_backward_compatible(&new).unwrap_err();
        let ContractError::Incompatible { lost_provides, new_requires } = err else {
            panic!("expected incompatibility");
        };
        assert_eq!(lost_provides, vec![key::<u64>()]);
        assert!(new_requires.is_empty());
    }

    #[test]
    fn adding_a_requirement_is_incompatible() {
        let old = contract(vec![key::<u32>()], vec![], vec![key::<String>()]);
        let new = contract(vec![key::<u32>(), key::<u8>()], vec![], vec![key::<String>()]);
        let err = old.check_backward_compatible(&new).unwrap_err();
        let ContractError::Incompatible { new_requires, .. } = err else {
            panic!("expected incompatibility");
        };
        assert_eq!(new_requires, vec![key::<u8>()]);
    }

    #[test]
    fn serializes_to_named_key_sets() {
        let c = contract(vec![key::<u32>()], vec![], vec![key::<String>()]);
        let json = serde_json::to_value(&c).expect("json");
        assert_eq!(json["requires"][0]["type"], "u32");
        assert_eq!(json["provides"][0]["type"], "alloc::string::String");
    }
}
