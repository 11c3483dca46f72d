//! Conversation configuration
//!
//! Settings can be built in code or loaded from JSON:
//!
//! ```json
//! { "bough": "intro", "tags": ["npc"], "log_severity": "warn", "max_slices": 1000 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use topi_vm::Severity;

use crate::error::{RuntimeError, RuntimeResult};

/// Settings for one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Bough started by `start` and `play`.
    /// Default: "main"
    pub bough: String,

    /// Host-side labels, e.g. for picking a UI skin. Passed through untouched.
    pub tags: Vec<String>,

    /// Process-wide VM log threshold applied when the conversation is created.
    /// Default: none (leave the current threshold)
    pub log_severity: Option<Severity>,

    /// Upper bound on `play` iterations; `None` runs until the bough ends.
    pub max_slices: Option<usize>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            bough: "main".to_string(),
            tags: Vec::new(),
            log_severity: None,
            max_slices: None,
        }
    }
}

impl ConversationConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bough to start
    pub fn bough(mut self, bough: impl Into<String>) -> Self {
        self.bough = bough.into();
        self
    }

    /// Add a host tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Apply a log threshold on creation
    pub fn log_severity(mut self, severity: Severity) -> Self {
        self.log_severity = Some(severity);
        self
    }

    /// Bound the number of `play` iterations
    pub fn max_slices(mut self, slices: usize) -> Self {
        self.max_slices = Some(slices);
        self
    }

    /// Check whether a host tag is present
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Parse from JSON text; missing fields take their defaults
    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RuntimeError::io(path, e))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConversationConfig::new();
        assert_eq!(config.bough, "main");
        assert!(config.max_slices.is_none());
        assert!(config.log_severity.is_none());
    }

    #[test]
    fn test_builder() {
        let config = ConversationConfig::new()
            .bough("intro")
            .tag("npc")
            .max_slices(10)
            .log_severity(Severity::Warn);
        assert_eq!(config.bough, "intro");
        assert!(config.has_tag("npc"));
        assert_eq!(config.max_slices, Some(10));
    }

    #[test]
    fn test_partial_json() {
        let config = ConversationConfig::from_json(r#"{"bough": "shop", "log_severity": "debug"}"#)
            .unwrap();
        assert_eq!(config.bough, "shop");
        assert_eq!(config.log_severity, Some(Severity::Debug));
        assert!(config.tags.is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConversationConfig::from_path("/nonexistent/topi.json"),
            Err(RuntimeError::Io { .. })
        ));
    }
}
