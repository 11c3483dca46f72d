//! # Topi VM
//!
//! Embeds the Topi dialogue VM behind opaque handles.
//!
//! A [`Library`] is the function contract table: every operation takes a
//! [`VmHandle`] first, never panics across the boundary, and reports
//! failures through the process-wide [`log`] channel. Script output
//! reaches the host through the [`Callbacks`] supplied at creation.
//!
//! ```ignore
//! let library = Library::new();
//! let handle = library.create(bytes, Arc::new(MyCallbacks))?;
//! library.start(handle, "main");
//! while library.can_continue(handle) {
//!     library.run(handle);
//!     // callbacks call select_continue / select_choice
//! }
//! library.destroy(handle);
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod callbacks;
pub mod error;
pub mod function;
pub mod handle;
pub mod library;
pub mod log;
pub mod snapshot;
pub mod vm;

pub use callbacks::{Callbacks, Choice, Line};
pub use error::{TopiError, TopiResult};
pub use function::ExternFunction;
pub use handle::VmHandle;
pub use library::Library;
pub use log::{Severity, set_log_handler, set_log_severity};
pub use snapshot::Snapshot;
pub use vm::{Vm, VmEvent, VmState, WaitKind};
