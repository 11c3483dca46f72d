//! Host-owned variables with change notification
//!
//! A [`VariableStore`] holds named values that outlive any one
//! conversation. Conversations push matching variables into their VM as
//! externs and mirror script changes back, so a store shared by several
//! conversations keeps them in agreement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use topi_value::{EnumDomain, EnumDomains, TaggedValue};

use crate::error::{RuntimeError, RuntimeResult};

/// Identifies a registered watcher
pub type WatchId = u64;

/// Change callback; receives the variable name and its new value
pub type Watcher = Arc<dyn Fn(&str, &TaggedValue) + Send + Sync>;

/// Named external variables
pub trait VariableStore: Send + Sync {
    /// Current value of `name`
    fn get(&self, name: &str) -> Option<TaggedValue>;

    /// Assign `name`; returns whether the value changed
    ///
    /// Watchers of `name` run after the store is updated, outside any
    /// internal lock.
    fn set(&self, name: &str, value: TaggedValue) -> RuntimeResult<bool>;

    /// Names of every stored variable
    fn names(&self) -> Vec<String>;

    /// Call `watcher` whenever `name` changes
    fn watch(&self, name: &str, watcher: Watcher) -> WatchId;

    /// Remove a watcher; returns whether it existed
    fn unwatch(&self, id: WatchId) -> bool;

    /// Enum domains stored values are validated against
    fn domains(&self) -> Vec<EnumDomain> {
        Vec::new()
    }
}

/// In-memory [`VariableStore`]
#[derive(Default)]
pub struct MemoryVariableStore {
    values: RwLock<FxHashMap<String, TaggedValue>>,
    domains: RwLock<EnumDomains>,
    watchers: RwLock<FxHashMap<WatchId, (String, Watcher)>>,
    next_id: AtomicU64,
}

impl MemoryVariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enum domain
    pub fn declare_enum(&self, domain: EnumDomain) {
        self.domains.write().declare(domain);
    }

    /// Add a variable without notifying watchers
    pub fn insert(&self, name: impl Into<String>, value: impl Into<TaggedValue>) -> &Self {
        self.values.write().insert(name.into(), value.into());
        self
    }

    /// Number of stored variables
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Number of registered watchers
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, name: &str) -> Option<TaggedValue> {
        self.values.read().get(name).cloned()
    }

    fn set(&self, name: &str, value: TaggedValue) -> RuntimeResult<bool> {
        {
            let mut values = self.values.write();
            let current = values.get(name).unwrap_or(&TaggedValue::Nil);
            self.domains
                .read()
                .check_assignment(current, &value)
                .map_err(|source| RuntimeError::Value {
                    name: name.to_string(),
                    source,
                })?;
            if values.get(name) == Some(&value) {
                return Ok(false);
            }
            values.insert(name.to_string(), value.clone());
        }

        let watchers: Vec<Watcher> = self
            .watchers
            .read()
            .values()
            .filter(|(watched, _)| watched == name)
            .map(|(_, watcher)| watcher.clone())
            .collect();
        for watcher in watchers {
            watcher(name, &value);
        }
        Ok(true)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn watch(&self, name: &str, watcher: Watcher) -> WatchId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.watchers.write().insert(id, (name.to_string(), watcher));
        id
    }

    fn unwatch(&self, id: WatchId) -> bool {
        self.watchers.write().remove(&id).is_some()
    }

    fn domains(&self) -> Vec<EnumDomain> {
        self.domains.read().iter().cloned().collect()
    }
}

impl std::fmt::Debug for MemoryVariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryVariableStore")
            .field("values", &*self.values.read())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
