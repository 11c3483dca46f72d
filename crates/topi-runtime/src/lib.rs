//! # Topi Runtime
//!
//! Host side of the Topi dialogue VM: conversations, speakers, variables,
//! persistent state and asset loading on top of [`topi_vm::Library`].
//!
//! ## Design Principles
//!
//! - **One dispatcher**: every VM shares a [`Dispatcher`] that routes
//!   callbacks to sessions by handle
//! - **Host-owned state**: the [`State`] aggregate outlives conversations
//!   and is amended as each one finishes
//! - **Explicit lifecycle**: conversations bind on start, unbind on
//!   finish, and release their VM on drop

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod asset;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod externs;
pub mod registry;
pub mod speaker;
pub mod state;
pub mod variables;

pub use asset::{Asset, AssetLoader, ByteData, FsAssetLoader, MemoryAssetLoader};
pub use config::ConversationConfig;
pub use conversation::{Conversation, FirstChoice, Phase, Responder};
pub use dispatch::Dispatcher;
pub use engine::{Engine, EngineBuilder};
pub use error::{RuntimeError, RuntimeResult};
pub use event::{ConversationEvent, SpokenLine, Step};
pub use externs::{ExternRegistry, ExternRegistryBuilder};
pub use registry::{Session, SessionRegistry};
pub use speaker::{NamedSpeaker, Speaker, SpeakerRegistry};
pub use state::State;
pub use variables::{MemoryVariableStore, VariableStore, WatchId, Watcher};

// Re-export the layers below for hosts that only depend on this crate
pub use topi_bytecode as bytecode;
pub use topi_value as value;
pub use topi_vm as vm;
