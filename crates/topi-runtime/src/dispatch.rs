//! Callback dispatch into sessions

use std::sync::Arc;

use topi_value::TaggedValue;
use topi_vm::log::report;
use topi_vm::{Callbacks, Choice, Line, Severity, VmHandle};

use crate::registry::{Session, SessionRegistry};

/// Routes VM callbacks to the owning [`Session`]
///
/// One dispatcher is shared by every VM an engine creates. Callbacks for
/// handles without a session are reported at [`Severity::Error`] and
/// dropped.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
}

impl Dispatcher {
    /// Dispatch through `sessions`
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    fn session(&self, handle: VmHandle, kind: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(handle);
        if session.is_none() {
            report(
                Severity::Error,
                &format!("No session for {handle}, dropping {kind}"),
            );
        }
        session
    }
}

impl Callbacks for Dispatcher {
    fn on_line(&self, handle: VmHandle, line: &Line) {
        if let Some(session) = self.session(handle, "line") {
            session.speak(line);
        }
    }

    fn on_choices(&self, handle: VmHandle, choices: &[Choice]) {
        if let Some(session) = self.session(handle, "choices") {
            session.offer(choices);
        }
    }

    fn on_value_changed(&self, handle: VmHandle, name: &str, value: &TaggedValue) {
        if let Some(session) = self.session(handle, "value change") {
            session.changed(name, value);
        }
    }
}
