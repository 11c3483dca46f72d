//! Persistent dialogue state
//!
//! [`State`] is the process-wide aggregate of every conversation's saved
//! globals. Conversations inject it into their VM on start and amend it
//! with their own snapshot on finish. Keys belonging to other containers
//! are carried along untouched.

use std::path::Path;

use parking_lot::RwLock;
use topi_value::TaggedValue;
use topi_vm::{Library, Snapshot, VmHandle};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// Aggregate snapshot shared by conversations
#[derive(Debug, Default)]
pub struct State {
    snapshot: RwLock<Snapshot>,
}

impl State {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Overwrite top-level keys from `snapshot`
    pub fn amend(&self, snapshot: &Snapshot) {
        self.snapshot.write().amend(snapshot);
    }

    /// Set one entry
    pub fn set(&self, name: &str, value: &TaggedValue) -> RuntimeResult<()> {
        self.snapshot
            .write()
            .insert(name, value)
            .map_err(|source| RuntimeError::Value {
                name: name.to_string(),
                source,
            })
    }

    /// Decoded entry, if present
    pub fn value(&self, name: &str) -> RuntimeResult<Option<TaggedValue>> {
        self.snapshot
            .read()
            .value(name)
            .transpose()
            .map_err(|source| RuntimeError::Value {
                name: name.to_string(),
                source,
            })
    }

    /// Remove an entry; returns whether it existed
    pub fn remove(&self, name: &str) -> bool {
        self.snapshot.write().remove(name).is_some()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.snapshot.write().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Check if there are no entries
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Copy of the aggregate
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Prime a VM's globals from the aggregate; returns how many applied
    pub fn inject(&self, library: &Library, handle: VmHandle) -> usize {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return 0;
        }
        let applied = library.load(handle, &snapshot);
        debug!(%handle, applied, total = snapshot.len(), "injected state");
        applied
    }

    /// Serialize the aggregate
    pub fn to_json(&self) -> RuntimeResult<String> {
        Ok(self.snapshot.read().to_json()?)
    }

    /// Replace the aggregate with parsed JSON
    pub fn replace_json(&self, text: &str) -> RuntimeResult<()> {
        *self.snapshot.write() = Snapshot::from_json(text)?;
        Ok(())
    }

    /// Write the aggregate to a file
    pub fn save_to(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        let path = path.as_ref();
        let text = self.to_json()?;
        std::fs::write(path, text).map_err(|e| RuntimeError::io(path, e))
    }

    /// Load a state file written by [`State::save_to`]
    pub fn load_from(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
        Ok(Self::from_snapshot(Snapshot::from_json(&text)?))
    }
}
