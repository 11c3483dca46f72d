//! Dialogue engine
//!
//! The [`Engine`] owns the VM table, the session registry and the shared
//! host collaborators (speakers, externs, variable store, state). Every
//! conversation it creates shares one [`Dispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use topi_runtime::{ConversationConfig, Engine, FirstChoice, FsAssetLoader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::builder().build();
//!     let loader = FsAssetLoader::new("dialogue").with_extension("topi");
//!
//!     let mut conversation = engine.load(&loader, "intro", ConversationConfig::new()).await?;
//!     conversation.play(&mut FirstChoice).await?;
//!     println!("{}", engine.state().to_json()?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use topi_vm::{Library, Severity};
use tracing::debug;

use crate::asset::{AssetLoader, ByteData};
use crate::config::ConversationConfig;
use crate::conversation::Conversation;
use crate::dispatch::Dispatcher;
use crate::error::RuntimeResult;
use crate::externs::ExternRegistry;
use crate::registry::{Session, SessionRegistry};
use crate::speaker::SpeakerRegistry;
use crate::state::State;
use crate::variables::VariableStore;

pub(crate) struct EngineInner {
    pub(crate) library: Arc<Library>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) state: Arc<State>,
    dispatcher: Arc<Dispatcher>,
    speakers: Arc<SpeakerRegistry>,
    externs: ExternRegistry,
    store: Option<Arc<dyn VariableStore>>,
}

/// Builder for creating an Engine with custom collaborators
#[derive(Default)]
pub struct EngineBuilder {
    speakers: Option<Arc<SpeakerRegistry>>,
    externs: ExternRegistry,
    store: Option<Arc<dyn VariableStore>>,
    state: Option<Arc<State>>,
    log_severity: Option<Severity>,
}

impl EngineBuilder {
    /// Use a shared speaker registry
    pub fn speakers(mut self, speakers: Arc<SpeakerRegistry>) -> Self {
        self.speakers = Some(speakers);
        self
    }

    /// Bind these externs into every conversation
    pub fn externs(mut self, externs: ExternRegistry) -> Self {
        self.externs = externs;
        self
    }

    /// Mirror matching externs to a variable store
    pub fn variables(mut self, store: Arc<dyn VariableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing state aggregate
    ///
    /// Default: a fresh, empty [`State`].
    pub fn state(mut self, state: Arc<State>) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the process-wide VM log threshold when building
    pub fn log_severity(mut self, severity: Severity) -> Self {
        self.log_severity = Some(severity);
        self
    }

    /// Build the engine
    pub fn build(self) -> Engine {
        let library = Arc::new(Library::new());
        if let Some(severity) = self.log_severity {
            library.set_log_severity(severity);
        }
        let sessions = Arc::new(SessionRegistry::new());
        Engine {
            inner: Arc::new(EngineInner {
                dispatcher: Arc::new(Dispatcher::new(sessions.clone())),
                library,
                sessions,
                state: self.state.unwrap_or_default(),
                speakers: self.speakers.unwrap_or_default(),
                externs: self.externs,
                store: self.store,
            }),
        }
    }
}

/// Creates and tracks conversations
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Create an engine with default collaborators
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The VM table
    pub fn library(&self) -> &Arc<Library> {
        &self.inner.library
    }

    /// Shared state aggregate
    pub fn state(&self) -> &Arc<State> {
        &self.inner.state
    }

    /// Speaker registry
    pub fn speakers(&self) -> &Arc<SpeakerRegistry> {
        &self.inner.speakers
    }

    /// Number of live conversations
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Create a conversation over imported bytecode
    ///
    /// Registered externs the container declares are bound immediately.
    pub fn conversation(
        &self,
        data: &ByteData,
        config: ConversationConfig,
    ) -> RuntimeResult<Conversation> {
        let inner = &self.inner;
        if let Some(severity) = config.log_severity {
            inner.library.set_log_severity(severity);
        }
        let handle = inner
            .library
            .create(data.bytes().to_vec(), inner.dispatcher.clone())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            handle,
            inner.speakers.clone(),
            inner.store.clone(),
            tx,
        ));
        inner.sessions.insert(session.clone());

        let bound = inner.externs.bind(&inner.library, handle, data.externs());
        debug!(%handle, bound, bough = %config.bough, "conversation created");
        session.emit(crate::event::ConversationEvent::Created { handle });

        Ok(Conversation::new(
            self.inner.clone(),
            session,
            config,
            data.externs().clone(),
            rx,
        ))
    }

    /// Import raw bytes and create a conversation over them
    pub fn conversation_from_bytes(
        &self,
        bytes: impl Into<Vec<u8>>,
        config: ConversationConfig,
    ) -> RuntimeResult<Conversation> {
        let data = ByteData::from_bytes(bytes)?;
        self.conversation(&data, config)
    }

    /// Load an asset and create a conversation over it
    pub async fn load(
        &self,
        loader: &impl AssetLoader,
        key: &str,
        config: ConversationConfig,
    ) -> RuntimeResult<Conversation> {
        let data = loader.load(key).await?;
        self.conversation(&data, config)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.inner.sessions.len())
            .field("vms", &self.inner.library.len())
            .finish()
    }
}
