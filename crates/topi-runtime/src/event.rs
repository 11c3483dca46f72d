//! Conversation events and step results

use topi_value::TaggedValue;
use topi_vm::{Choice, Line, VmHandle};

/// A line with its speaker resolved for display
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenLine {
    /// Display name from the speaker registry, or the raw speaker id
    pub speaker_name: String,
    /// The line as the script emitted it
    pub line: Line,
}

/// Notifications for host UI, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// VM created and externs bound
    Created {
        /// Handle of the new VM
        handle: VmHandle,
    },
    /// Bough started
    Started {
        /// Bough name
        bough: String,
    },
    /// A line is waiting to be acknowledged
    Line(SpokenLine),
    /// A choice is waiting to be made
    Choices(Vec<Choice>),
    /// A subscribed global changed
    ValueChanged {
        /// Global name
        name: String,
        /// New value
        value: TaggedValue,
    },
    /// Conversation finished and state was saved
    Ended,
}

/// Outcome of one execution slice
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Still executing; tick again
    Running,
    /// Waiting on `continue_line`
    Line(SpokenLine),
    /// Waiting on `select_choice`
    Choices(Vec<Choice>),
    /// Bough ended
    Finished,
}

impl Step {
    /// True when the host must answer before the next tick
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Line(_) | Self::Choices(_))
    }
}
