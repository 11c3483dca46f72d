//! Extern registration table
//!
//! Host functions and values are registered once, by name, and applied to
//! every VM whose container declares a matching extern. Entries the
//! container does not ask for are skipped with a warning on the log channel.
//!
//! ```
//! use topi_runtime::ExternRegistry;
//!
//! let externs = ExternRegistry::builder()
//!     .function("roll", 1, |args| {
//!         let sides = args[0].as_number().unwrap_or(6.0);
//!         sides.into()
//!     })
//!     .value("player", "Ada")
//!     .build();
//! assert_eq!(externs.len(), 2);
//! ```

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use topi_value::TaggedValue;
use topi_vm::log::{self, Severity};
use topi_vm::{ExternFunction, Library, VmHandle};

#[derive(Clone)]
enum ExternEntry {
    Value(TaggedValue),
    Function(ExternFunction),
}

/// Named host bindings
#[derive(Clone, Default)]
pub struct ExternRegistry {
    entries: FxHashMap<String, ExternEntry>,
}

impl ExternRegistry {
    /// Start building a registry
    pub fn builder() -> ExternRegistryBuilder {
        ExternRegistryBuilder::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check for an entry
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Apply every entry named in `externs`; returns how many were bound
    pub fn bind(&self, library: &Library, handle: VmHandle, externs: &BTreeSet<String>) -> usize {
        let mut bound = 0;
        for (name, entry) in &self.entries {
            if !externs.contains(name) {
                log::report(
                    Severity::Warn,
                    &format!("Container of {handle} declares no extern `{name}`, skipping binding"),
                );
                continue;
            }
            let ok = match entry {
                ExternEntry::Value(value) => library.set_extern(handle, name, value.clone()),
                ExternEntry::Function(function) => {
                    library.set_extern_func(handle, name, function.clone())
                }
            };
            if ok {
                bound += 1;
            }
        }
        bound
    }
}

impl std::fmt::Debug for ExternRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Builder for [`ExternRegistry`]
#[derive(Default)]
pub struct ExternRegistryBuilder {
    entries: FxHashMap<String, ExternEntry>,
}

impl ExternRegistryBuilder {
    /// Register a host function taking exactly `arity` arguments
    pub fn function(
        mut self,
        name: impl Into<String>,
        arity: usize,
        f: impl Fn(&[TaggedValue]) -> TaggedValue + Send + Sync + 'static,
    ) -> Self {
        self.entries.insert(
            name.into(),
            ExternEntry::Function(ExternFunction::new(arity, f)),
        );
        self
    }

    /// Register an initial extern value
    pub fn value(mut self, name: impl Into<String>, value: impl Into<TaggedValue>) -> Self {
        self.entries
            .insert(name.into(), ExternEntry::Value(value.into()));
        self
    }

    /// Finish the table
    pub fn build(self) -> ExternRegistry {
        ExternRegistry {
            entries: self.entries,
        }
    }
}
