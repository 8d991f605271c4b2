//! Name to implementation map shared by the provider and DNS backend lookups.
//!
//! Entries are only ever added by explicit `register` calls at startup.
//! Registration takes the write lock, lookups and listing take the read lock.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::error::{DriftError, DriftResult};

pub struct Registry<T: ?Sized> {
    label: &'static str,
    entries: RwLock<BTreeMap<String, Arc<T>>>,
}

impl<T: ?Sized + Send + Sync> Registry<T> {
    /// `label` names what is registered ("provider", "dns backend") in errors.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Binds `name`. Binding a name twice is an error, never an overwrite.
    pub fn register(&self, name: impl Into<String>, item: Arc<T>) -> DriftResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(DriftError::AlreadyRegistered {
                registry: self.label,
                name,
            });
        }
        entries.insert(name, item);
        Ok(())
    }

    pub fn get(&self, name: &str) -> DriftResult<Arc<T>> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DriftError::NotRegistered {
                registry: self.label,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}
