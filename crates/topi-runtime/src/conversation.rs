//! Conversations
//!
//! A [`Conversation`] owns one VM and its session. It can be driven by
//! hand, one [`Conversation::tick`] at a time, answering lines and choices
//! as the UI sees fit, or played to the end by [`Conversation::play`] with
//! a [`Responder`].
//!
//! Lifecycle: created (externs bound) → started (state injected, variable
//! store bound) → finished (state amended, speaker stopped, store unbound)
//! → destroyed. Destroying is idempotent and happens on drop.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use topi_value::TaggedValue;
use topi_vm::{Choice, ExternFunction, Snapshot, TopiError, VmHandle, VmState};
use tracing::{debug, info, warn};

use crate::config::ConversationConfig;
use crate::engine::EngineInner;
use crate::error::{RuntimeError, RuntimeResult};
use crate::event::{ConversationEvent, SpokenLine, Step};
use crate::registry::Session;

/// Answers lines and choices for [`Conversation::play`]
pub trait Responder: Send {
    /// Called for each line before it is acknowledged
    fn line(&mut self, _line: &SpokenLine) {}

    /// Pick an option index
    fn choose(&mut self, choices: &[Choice]) -> usize;
}

/// Responder that always picks the first option
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstChoice;

impl Responder for FirstChoice {
    fn choose(&mut self, _choices: &[Choice]) -> usize {
        0
    }
}

/// Where a conversation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// VM exists, nothing started
    Created,
    /// A bough is executing or waiting
    Started,
    /// The bough ended and state was saved
    Finished,
    /// VM released
    Destroyed,
}

/// One dialogue run over a VM
pub struct Conversation {
    engine: Arc<EngineInner>,
    handle: VmHandle,
    session: Arc<Session>,
    config: ConversationConfig,
    externs: BTreeSet<String>,
    events: mpsc::UnboundedReceiver<ConversationEvent>,
    phase: Phase,
}

impl Conversation {
    pub(crate) fn new(
        engine: Arc<EngineInner>,
        session: Arc<Session>,
        config: ConversationConfig,
        externs: BTreeSet<String>,
        events: mpsc::UnboundedReceiver<ConversationEvent>,
    ) -> Self {
        Self {
            handle: session.handle(),
            engine,
            session,
            config,
            externs,
            events,
            phase: Phase::Created,
        }
    }

    /// Handle of the underlying VM
    pub fn handle(&self) -> VmHandle {
        self.handle
    }

    /// Settings this conversation was created with
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Extern names the container declares
    pub fn externs(&self) -> &BTreeSet<String> {
        &self.externs
    }

    /// Names mirrored from the variable store
    pub fn bound_variables(&self) -> Vec<String> {
        self.session.bound_names()
    }

    fn ensure_alive(&self) -> RuntimeResult<()> {
        if self.phase == Phase::Destroyed {
            Err(RuntimeError::Destroyed(self.handle))
        } else {
            Ok(())
        }
    }

    /// Start the configured bough
    pub fn start(&mut self) -> RuntimeResult<()> {
        let bough = self.config.bough.clone();
        self.start_bough(&bough)
    }

    /// Start a specific bough
    ///
    /// Injects the shared state and binds the variable store first. A
    /// finished conversation may be started again.
    pub fn start_bough(&mut self, bough: &str) -> RuntimeResult<()> {
        self.ensure_alive()?;
        let library = &self.engine.library;
        self.engine.state.inject(library, self.handle);
        self.session.bind_store(library, &self.externs);
        if !library.start(self.handle, bough) {
            return Err(RuntimeError::StartFailed(bough.to_string()));
        }
        self.session.clear_pending();
        self.phase = Phase::Started;
        self.session.emit(ConversationEvent::Started {
            bough: bough.to_string(),
        });
        info!(handle = %self.handle, bough, "conversation started");
        Ok(())
    }

    fn vm_state(&self) -> RuntimeResult<VmState> {
        self.engine
            .library
            .state(self.handle)
            .ok_or(RuntimeError::Destroyed(self.handle))
    }

    /// Run one slice
    ///
    /// While the VM waits, returns the pending line or choice set again
    /// without executing. Reaching the end finishes the conversation.
    pub fn tick(&mut self) -> RuntimeResult<Step> {
        self.ensure_alive()?;
        match self.vm_state()? {
            VmState::Ready => Err(TopiError::InvalidState {
                operation: "tick",
                state: VmState::Ready,
            }
            .into()),
            VmState::Faulted => Err(RuntimeError::Faulted(self.handle)),
            VmState::Finished => {
                self.finish()?;
                Ok(Step::Finished)
            }
            VmState::Waiting(_) => Ok(self.session.pending().unwrap_or(Step::Running)),
            VmState::Running => {
                self.session.clear_pending();
                let ran = self.engine.library.run(self.handle);
                match self.vm_state()? {
                    VmState::Faulted => Err(RuntimeError::Faulted(self.handle)),
                    _ if !ran => Err(RuntimeError::Rejected("run")),
                    VmState::Waiting(_) => Ok(self.session.pending().unwrap_or(Step::Running)),
                    VmState::Finished => {
                        self.finish()?;
                        Ok(Step::Finished)
                    }
                    _ => Ok(Step::Running),
                }
            }
        }
    }

    /// Acknowledge the pending line
    pub fn continue_line(&mut self) -> RuntimeResult<()> {
        self.ensure_alive()?;
        if !self.engine.library.select_continue(self.handle) {
            return Err(RuntimeError::Rejected("continue"));
        }
        self.session.clear_pending();
        Ok(())
    }

    /// Pick an option of the pending choice set
    pub fn select_choice(&mut self, index: usize) -> RuntimeResult<()> {
        self.ensure_alive()?;
        if !self.engine.library.select_choice(self.handle, index) {
            return Err(RuntimeError::Rejected("select_choice"));
        }
        self.session.clear_pending();
        Ok(())
    }

    /// Drive to the end, yielding to the runtime between slices
    ///
    /// Starts the configured bough if nothing has started yet. An
    /// out-of-range answer is ignored and the responder is asked again.
    /// Fails with [`RuntimeError::SliceBudgetExhausted`] when `max_slices`
    /// runs out.
    pub async fn play(&mut self, responder: &mut impl Responder) -> RuntimeResult<()> {
        if self.phase == Phase::Created {
            self.start()?;
        }
        let mut slices = 0;
        loop {
            if let Some(max) = self.config.max_slices
                && slices >= max
            {
                return Err(RuntimeError::SliceBudgetExhausted(max));
            }
            slices += 1;
            match self.tick()? {
                Step::Finished => return Ok(()),
                Step::Running => {}
                Step::Line(line) => {
                    responder.line(&line);
                    self.continue_line()?;
                }
                Step::Choices(choices) => {
                    let index = responder.choose(&choices);
                    match self.select_choice(index) {
                        Ok(()) => {}
                        Err(RuntimeError::Rejected(_)) if index >= choices.len() => {
                            warn!(
                                handle = %self.handle,
                                index,
                                count = choices.len(),
                                "choice out of range, asking again"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Assign an extern variable
    pub fn set(&self, name: &str, value: impl Into<TaggedValue>) -> RuntimeResult<bool> {
        self.ensure_alive()?;
        Ok(self.engine.library.set_extern(self.handle, name, value.into()))
    }

    /// Bind a host function to an extern
    pub fn set_function(
        &self,
        name: &str,
        arity: usize,
        f: impl Fn(&[TaggedValue]) -> TaggedValue + Send + Sync + 'static,
    ) -> RuntimeResult<bool> {
        self.ensure_alive()?;
        Ok(self
            .engine
            .library
            .set_extern_func(self.handle, name, ExternFunction::new(arity, f)))
    }

    /// Observe script changes to `name` as [`ConversationEvent::ValueChanged`]
    pub fn subscribe(&self, name: &str) -> RuntimeResult<bool> {
        self.ensure_alive()?;
        Ok(self.engine.library.subscribe(self.handle, name))
    }

    /// Stop observing `name`
    pub fn unsubscribe(&self, name: &str) -> RuntimeResult<bool> {
        self.ensure_alive()?;
        Ok(self.engine.library.unsubscribe(self.handle, name))
    }

    /// Current value of a global; `None` when it does not exist
    pub fn value(&self, name: &str) -> RuntimeResult<Option<TaggedValue>> {
        self.ensure_alive()?;
        let Some(buffer) = self.engine.library.get_value(self.handle, name) else {
            return Ok(None);
        };
        Ok(Some(buffer.decode()?))
    }

    /// Capture this VM's globals
    pub fn save_state(&self) -> RuntimeResult<Snapshot> {
        self.ensure_alive()?;
        self.engine
            .library
            .save(self.handle)
            .ok_or(RuntimeError::Rejected("save"))
    }

    /// Prime globals from a snapshot; returns how many entries applied
    pub fn load_state(&self, snapshot: &Snapshot) -> RuntimeResult<usize> {
        self.ensure_alive()?;
        Ok(self.engine.library.load(self.handle, snapshot))
    }

    /// Next queued event, if any
    pub fn try_next_event(&mut self) -> Option<ConversationEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event
    pub async fn next_event(&mut self) -> Option<ConversationEvent> {
        self.events.recv().await
    }

    /// Take every queued event
    pub fn drain_events(&mut self) -> Vec<ConversationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Save into the shared state and release host bindings
    ///
    /// Called by `tick` when the bough ends; a no-op unless started.
    pub fn finish(&mut self) -> RuntimeResult<()> {
        if self.phase != Phase::Started {
            return Ok(());
        }
        let snapshot = self.save_state()?;
        self.engine.state.amend(&snapshot);
        self.session.stop_speaker();
        self.session.unbind_store(&self.engine.library);
        self.phase = Phase::Finished;
        self.session.emit(ConversationEvent::Ended);
        info!(handle = %self.handle, saved = snapshot.len(), "conversation finished");
        Ok(())
    }

    /// Release the VM; returns false if already destroyed
    pub fn destroy(&mut self) -> bool {
        if self.phase == Phase::Destroyed {
            return false;
        }
        self.session.stop_speaker();
        self.session.unbind_store(&self.engine.library);
        self.engine.sessions.remove(self.handle);
        self.engine.library.destroy(self.handle);
        self.phase = Phase::Destroyed;
        debug!(handle = %self.handle, "conversation destroyed");
        true
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("handle", &self.handle)
            .field("bough", &self.config.bough)
            .field("phase", &self.phase)
            .finish()
    }
}
