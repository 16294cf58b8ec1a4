use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;

use pws_core::{SECRET_SUFFIX, SecretName};

use crate::{SecretStore, StorageError};

/// Plaintext store kept in process memory. Nothing is encrypted or
/// persisted; meant for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: RefCell<BTreeMap<SecretName, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemoryStore {
    fn resolve(&self, name: &SecretName) -> PathBuf {
        PathBuf::from(format!("{name}{SECRET_SUFFIX}"))
    }

    fn exists(&self, name: &SecretName) -> bool {
        self.secrets.borrow().contains_key(name)
    }

    fn read(&self, name: &SecretName) -> Result<String, StorageError> {
        self.secrets
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn write(&self, name: &SecretName, plaintext: &str) -> Result<(), StorageError> {
        self.secrets
            .borrow_mut()
            .insert(name.clone(), plaintext.to_owned());
        Ok(())
    }

    fn list(&self, namespace: &str) -> Result<Vec<SecretName>, StorageError> {
        Ok(self
            .secrets
            .borrow()
            .keys()
            .filter(|name| name.is_within(namespace))
            .cloned()
            .collect())
    }

    fn remove(&self, name: &SecretName) -> Result<(), StorageError> {
        self.secrets
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}
