//! # Topi Bytecode
//!
//! This crate defines the container format the Topi compiler emits and the
//! VM executes.
//!
//! ## Design Principles
//!
//! - **Versioned**: the header carries an explicit format version; layouts are never guessed
//! - **Bounds-checked**: malformed or truncated input is a [`FormatError`], never a panic
//! - **Owned**: a parsed [`Container`] owns its bytes in a heap allocation that does not move

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod container;
pub mod error;
pub mod instruction;
pub mod symbol;

pub use builder::{ContainerBuilder, Label};
pub use container::Container;
pub use error::{FormatError, FormatResult, Section};
pub use instruction::{ChoiceOption, DISCARD, Instruction, Opcode};
pub use symbol::{Bough, GlobalSymbol};

/// Magic bytes at the start of every container
pub const CONTAINER_MAGIC: [u8; 4] = *b"TOPI";

/// Size of the fixed header (magic, version, reserved)
pub const HEADER_LEN: usize = 8;

/// Container layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FormatVersion {
    /// Tables follow the header back to back; bough names use a 1-byte length
    Sequential = 1,
    /// Header holds absolute table offsets; bough names use a 2-byte length
    Offset = 2,
}

impl FormatVersion {
    /// Newest layout, written by default
    pub const CURRENT: Self = Self::Offset;

    /// Decode the header's version field
    pub fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::Sequential),
            2 => Some(Self::Offset),
            _ => None,
        }
    }
}
