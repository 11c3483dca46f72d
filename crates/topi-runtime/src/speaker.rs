//! Speakers
//!
//! A [`Speaker`] is the host object that voices a line: a portrait, a
//! text box, an audio source. Scripts refer to speakers by id; the
//! [`SpeakerRegistry`] resolves ids to speakers and their display names.

use std::sync::Arc;

use dashmap::DashMap;
use topi_vm::Line;

/// Host sink for spoken lines
pub trait Speaker: Send + Sync {
    /// Display name shown with the line
    fn name(&self) -> &str;

    /// Begin presenting a line
    fn start(&self, _line: &Line) {}

    /// Stop presenting; called before the next speaker starts and when the
    /// conversation ends
    fn stop(&self) {}
}

/// Speaker that only carries a display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSpeaker {
    name: String,
}

impl NamedSpeaker {
    /// Create a speaker displayed as `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Speaker for NamedSpeaker {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Speakers by script id
#[derive(Default)]
pub struct SpeakerRegistry {
    speakers: DashMap<String, Arc<dyn Speaker>>,
}

impl SpeakerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a speaker, returning the one it replaced
    pub fn register(
        &self,
        id: impl Into<String>,
        speaker: Arc<dyn Speaker>,
    ) -> Option<Arc<dyn Speaker>> {
        self.speakers.insert(id.into(), speaker)
    }

    /// Remove a speaker
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Speaker>> {
        self.speakers.remove(id).map(|(_, speaker)| speaker)
    }

    /// Look up a speaker
    pub fn get(&self, id: &str) -> Option<Arc<dyn Speaker>> {
        self.speakers.get(id).map(|entry| entry.value().clone())
    }

    /// Display name for `id`, falling back to the id itself
    pub fn display_name(&self, id: &str) -> String {
        self.get(id)
            .map(|speaker| speaker.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// Number of registered speakers
    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    /// Check if no speaker is registered
    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }
}

impl std::fmt::Debug for SpeakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerRegistry")
            .field("speakers", &self.speakers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_id() {
        let registry = SpeakerRegistry::new();
        registry.register("mara", Arc::new(NamedSpeaker::new("Mara the Smith")));

        assert_eq!(registry.display_name("mara"), "Mara the Smith");
        assert_eq!(registry.display_name("stranger"), "stranger");
    }

    #[test]
    fn test_register_replaces() {
        let registry = SpeakerRegistry::new();
        assert!(registry.register("a", Arc::new(NamedSpeaker::new("A"))).is_none());
        let old = registry.register("a", Arc::new(NamedSpeaker::new("B"))).unwrap();
        assert_eq!(old.name(), "A");
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("a").is_some());
        assert!(registry.is_empty());
    }
}
