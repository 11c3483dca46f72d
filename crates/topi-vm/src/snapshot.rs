//! Saved VM state
//!
//! A snapshot is a flat JSON object from global name to value, using the
//! mapping in [`topi_value::json`]. Snapshots from different containers
//! combine with [`Snapshot::amend`], a top-level key-wise overwrite.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use topi_value::{TaggedValue, ValueResult, json};

use crate::error::TopiResult;

/// Global name → value document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse JSON text; anything but an object is rejected
    pub fn from_json(text: &str) -> TopiResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> TopiResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Overwrite keys from `other`; nested values are replaced whole
    pub fn amend(&mut self, other: &Snapshot) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Store a value under `name`
    pub fn insert(&mut self, name: impl Into<String>, value: &TaggedValue) -> ValueResult<()> {
        self.0.insert(name.into(), json::to_json(value)?);
        Ok(())
    }

    /// Raw JSON under `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Decoded value under `name`
    pub fn value(&self, name: &str) -> Option<ValueResult<TaggedValue>> {
        self.0.get(name).map(json::from_json)
    }

    /// Remove an entry
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Snapshot {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Map serialization cannot fail: keys are strings and numbers are finite
        match serde_json::to_string(&self.0) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_amend_overwrites_top_level_keys() {
        let mut aggregate = snapshot(json!({"a": 1, "b": 2}));
        aggregate.amend(&snapshot(json!({"b": 3, "c": 4})));
        assert_eq!(aggregate, snapshot(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn test_amend_is_not_deep() {
        let mut aggregate = snapshot(json!({"m": {"map": [["x", 1.0]]}}));
        aggregate.amend(&snapshot(json!({"m": {"map": [["y", 2.0]]}})));
        let map = aggregate.value("m").unwrap().unwrap();
        assert_eq!(map.as_map().unwrap().len(), 1);
    }

    #[test]
    fn test_json_text() {
        let mut state = Snapshot::new();
        state.insert("act", &TaggedValue::enumeration("Act", "intro")).unwrap();
        state.insert("coins", &TaggedValue::from(5)).unwrap();

        let text = state.to_json().unwrap();
        let back = Snapshot::from_json(&text).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.value("coins").unwrap().unwrap(), TaggedValue::from(5));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Snapshot::from_json("[1, 2]").is_err());
        assert!(Snapshot::from_json("not json").is_err());
    }
}
