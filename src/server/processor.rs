//! Processor Registry
//!
//! Maps resource identities to their processors. Registration is a setup
//! concern: duplicate registration and lookup misses are explicit errors,
//! never silent fallbacks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a resource kind handled by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Identity {}|{}>", self.name, self.category)
    }
}

/// Handler bound to one resource identity. Dispatch itself lives outside
/// this crate; the registry only owns the identity-to-processor mapping.
pub trait Processor: Send + Sync {
    /// The identity this processor handles
    fn identity(&self) -> Identity;
}

type Entries = HashMap<String, Arc<dyn Processor>>;

/// Identity-keyed registry of processors
#[derive(Default)]
pub struct ProcessorRegistry {
    entries: RwLock<Entries>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a processor under its identity name
    pub fn register(&self, processor: Arc<dyn Processor>) -> Result<(), RegistryError> {
        let identity = processor.identity();
        let mut entries = self.write();
        if entries.contains_key(&identity.name) {
            return Err(RegistryError::Duplicate(identity.name));
        }
        entries.insert(identity.name, processor);
        Ok(())
    }

    /// Remove the processor registered for an identity
    pub fn unregister(&self, identity: &Identity) -> Result<(), RegistryError> {
        self.write()
            .remove(&identity.name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotRegistered(identity.name.clone()))
    }

    /// Look up the processor registered for an identity
    pub fn get(&self, identity: &Identity) -> Result<Arc<dyn Processor>, RegistryError> {
        self.read()
            .get(&identity.name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(identity.name.clone()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Registry setup errors, returned synchronously to the caller
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Identity {0} already has a registered processor")]
    Duplicate(String),

    #[error("No registered processor for identity {0}")]
    NotRegistered(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ListProcessor;

    impl Processor for ListProcessor {
        fn identity(&self) -> Identity {
            Identity::new("list", "lists")
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProcessorRegistry::new();
        registry.register(Arc::new(ListProcessor)).unwrap();

        let identity = Identity::new("list", "lists");
        let processor = registry.get(&identity).unwrap();
        assert_eq!(processor.identity(), identity);
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let registry = ProcessorRegistry::new();
        registry.register(Arc::new(ListProcessor)).unwrap();

        let result = registry.register(Arc::new(ListProcessor));
        assert_eq!(result, Err(RegistryError::Duplicate("list".to_string())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_miss_is_an_error() {
        let registry = ProcessorRegistry::new();
        let identity = Identity::new("task", "tasks");

        assert_eq!(
            registry.get(&identity).err(),
            Some(RegistryError::NotRegistered("task".to_string()))
        );
        assert_eq!(
            registry.unregister(&identity),
            Err(RegistryError::NotRegistered("task".to_string()))
        );
    }

    #[test]
    fn test_unregister_then_reregister() {
        let registry = ProcessorRegistry::new();
        registry.register(Arc::new(ListProcessor)).unwrap();

        let identity = Identity::new("list", "lists");
        registry.unregister(&identity).unwrap();
        assert!(registry.is_empty());

        registry.register(Arc::new(ListProcessor)).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
