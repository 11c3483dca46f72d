//! Host callbacks and their payloads

use topi_value::TaggedValue;

use crate::handle::VmHandle;

/// A line of dialogue
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Speaking character
    pub speaker: String,
    /// Line text
    pub content: String,
    /// Author tags
    pub tags: Vec<String>,
}

/// One option of a choice set
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// Option text
    pub content: String,
    /// Author tags
    pub tags: Vec<String>,
    /// How often this option has been picked before
    pub visit_count: u32,
    /// Code offset the option resumes at
    pub ip: u32,
}

/// Receiver for script output
///
/// Calls arrive on the thread that called `run`, after the VM has released
/// its borrow and its lock. Implementations may call into any handle,
/// including this one (except `start` and `run` on it).
pub trait Callbacks: Send + Sync {
    /// A line was emitted; the VM waits for `select_continue`
    fn on_line(&self, handle: VmHandle, line: &Line);

    /// Choices were emitted; the VM waits for `select_choice`
    fn on_choices(&self, handle: VmHandle, choices: &[Choice]);

    /// A subscribed global was changed by the script
    fn on_value_changed(&self, handle: VmHandle, name: &str, value: &TaggedValue) {
        let _ = (handle, name, value);
    }
}
