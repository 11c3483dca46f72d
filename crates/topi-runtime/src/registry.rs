//! Handle → session routing
//!
//! Every VM the engine creates shares one callback receiver. The
//! [`SessionRegistry`] maps the VM's handle back to the [`Session`] that
//! owns the host-side state of that conversation.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use topi_value::TaggedValue;
use topi_vm::{Choice, Library, Line, VmHandle};
use tracing::{debug, warn};

use crate::event::{ConversationEvent, SpokenLine, Step};
use crate::speaker::{Speaker, SpeakerRegistry};
use crate::variables::{VariableStore, WatchId};

/// Host-side state of one conversation
pub struct Session {
    handle: VmHandle,
    speakers: Arc<SpeakerRegistry>,
    speaker: Mutex<Option<Arc<dyn Speaker>>>,
    pending: Mutex<Option<Step>>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    store: Option<Arc<dyn VariableStore>>,
    bindings: Mutex<Vec<(String, WatchId)>>,
}

impl Session {
    pub(crate) fn new(
        handle: VmHandle,
        speakers: Arc<SpeakerRegistry>,
        store: Option<Arc<dyn VariableStore>>,
        events: mpsc::UnboundedSender<ConversationEvent>,
    ) -> Self {
        Self {
            handle,
            speakers,
            speaker: Mutex::new(None),
            pending: Mutex::new(None),
            events,
            store,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Handle of the session's VM
    pub fn handle(&self) -> VmHandle {
        self.handle
    }

    /// Names currently mirrored from the variable store
    pub fn bound_names(&self) -> Vec<String> {
        self.bindings
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn emit(&self, event: ConversationEvent) {
        // The receiver lives in the conversation; once it is gone nobody listens
        let _ = self.events.send(event);
    }

    pub(crate) fn speak(&self, line: &Line) {
        self.stop_speaker();
        let speaker = self.speakers.get(&line.speaker);
        let speaker_name = match &speaker {
            Some(speaker) => speaker.name().to_string(),
            None => line.speaker.clone(),
        };
        if let Some(speaker) = &speaker {
            speaker.start(line);
        }
        *self.speaker.lock() = speaker;

        let spoken = SpokenLine {
            speaker_name,
            line: line.clone(),
        };
        *self.pending.lock() = Some(Step::Line(spoken.clone()));
        self.emit(ConversationEvent::Line(spoken));
    }

    pub(crate) fn offer(&self, choices: &[Choice]) {
        *self.pending.lock() = Some(Step::Choices(choices.to_vec()));
        self.emit(ConversationEvent::Choices(choices.to_vec()));
    }

    pub(crate) fn changed(&self, name: &str, value: &TaggedValue) {
        let mirrored = self.bindings.lock().iter().any(|(bound, _)| bound == name);
        if mirrored && let Some(store) = &self.store {
            if let Err(err) = store.set(name, value.clone()) {
                warn!(handle = %self.handle, %err, "variable store rejected script change");
            }
        }
        self.emit(ConversationEvent::ValueChanged {
            name: name.to_string(),
            value: value.clone(),
        });
    }

    pub(crate) fn pending(&self) -> Option<Step> {
        self.pending.lock().clone()
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.lock().take();
    }

    pub(crate) fn stop_speaker(&self) {
        let previous = self.speaker.lock().take();
        if let Some(speaker) = previous {
            speaker.stop();
        }
    }

    /// Push store variables the container declares as externs into the VM,
    /// subscribe to them, and mirror later store changes back
    pub(crate) fn bind_store(&self, library: &Arc<Library>, externs: &BTreeSet<String>) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        for domain in store.domains() {
            library.declare_enum(self.handle, domain);
        }

        let mut bindings = self.bindings.lock();
        for name in store.names() {
            if !externs.contains(&name) || bindings.iter().any(|(bound, _)| *bound == name) {
                continue;
            }
            if let Some(value) = store.get(&name) {
                library.set_extern(self.handle, &name, value);
            }
            library.subscribe(self.handle, &name);

            let weak: Weak<Library> = Arc::downgrade(library);
            let handle = self.handle;
            let id = store.watch(
                &name,
                Arc::new(move |name, value| {
                    if let Some(library) = weak.upgrade() {
                        library.set_extern(handle, name, value.clone());
                    }
                }),
            );
            bindings.push((name, id));
        }
        debug!(handle = %self.handle, bound = bindings.len(), "bound variable store");
        bindings.len()
    }

    pub(crate) fn unbind_store(&self, library: &Library) {
        let bindings = std::mem::take(&mut *self.bindings.lock());
        let Some(store) = &self.store else {
            return;
        };
        for (name, id) in bindings {
            store.unwatch(id);
            library.unsubscribe(self.handle, &name);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("bound", &self.bound_names())
            .finish()
    }
}

/// Live sessions by VM handle
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<VmHandle, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its handle
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.handle(), session);
    }

    /// Look up a session; the registry lock is released before returning
    pub fn get(&self, handle: VmHandle) -> Option<Arc<Session>> {
        self.sessions.get(&handle).map(|entry| entry.value().clone())
    }

    /// Remove a session
    pub fn remove(&self, handle: VmHandle) -> Option<Arc<Session>> {
        self.sessions.remove(&handle).map(|(_, session)| session)
    }

    /// Check for a live session
    pub fn contains(&self, handle: VmHandle) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
