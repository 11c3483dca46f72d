//! Container format errors

use std::fmt;

use thiserror::Error;
use topi_value::DecodeError;

/// Part of the container being read when an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Magic, version and table offsets
    Header,
    /// Global symbol table
    GlobalTable,
    /// Bough table
    BoughTable,
    /// Code section
    Code,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::GlobalTable => "global table",
            Self::BoughTable => "bough table",
            Self::Code => "code section",
        })
    }
}

/// Errors produced while reading or writing a container
///
/// Any variant means the buffer is not usable compiled bytecode. Callers
/// that import assets treat it as "not compiled" rather than as a crash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Invalid magic bytes
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported container version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Truncated or undecodable data
    #[error("Malformed {section}: {source}")]
    Malformed {
        /// Section being read
        section: Section,
        /// Underlying decode failure
        #[source]
        source: DecodeError,
    },

    /// Table offset pointing outside the buffer
    #[error("{section} offset {offset} is outside the {len}-byte buffer")]
    OffsetOutOfRange {
        /// Section the offset refers to
        section: Section,
        /// Declared offset
        offset: u64,
        /// Buffer length
        len: usize,
    },

    /// Flag byte other than 0 or 1
    #[error("Invalid {flag} flag {byte:#04x} on global `{name}`")]
    InvalidFlag {
        /// Global name
        name: String,
        /// Flag name
        flag: &'static str,
        /// Offending byte
        byte: u8,
    },

    /// Two globals share a name
    #[error("Duplicate global `{0}`")]
    DuplicateSymbol(String),

    /// Two globals share a slot index
    #[error("Duplicate global index {0}")]
    DuplicateGlobalIndex(u32),

    /// Two boughs share a name
    #[error("Duplicate bough `{0}`")]
    DuplicateBough(String),

    /// Bough entry outside the code section
    #[error("Bough `{bough}` entry {entry} is outside the {code_len}-byte code section")]
    EntryOutOfRange {
        /// Bough name
        bough: String,
        /// Declared entry
        entry: u32,
        /// Code section length
        code_len: usize,
    },

    /// Unknown opcode in the code section
    #[error("Invalid opcode {opcode:#04x} at {ip}")]
    InvalidOpcode {
        /// Opcode byte
        opcode: u8,
        /// Instruction pointer
        ip: u32,
    },

    /// Name, string or count longer than its length prefix allows
    #[error("`{0}` exceeds its length prefix")]
    Oversized(String),

    /// Builder label used but never bound
    #[error("Label {0} was never bound")]
    UnboundLabel(u32),
}

impl FormatError {
    pub(crate) fn malformed(section: Section) -> impl FnOnce(DecodeError) -> Self {
        move |source| Self::Malformed { section, source }
    }

    /// Check whether the input simply ended too early
    pub fn is_truncated(&self) -> bool {
        matches!(
            self,
            Self::Malformed {
                source: DecodeError::UnexpectedEnd { .. },
                ..
            } | Self::OffsetOutOfRange { .. }
        )
    }
}

/// Result type for container operations
pub type FormatResult<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display_names_section() {
        let err = FormatError::malformed(Section::GlobalTable)(DecodeError::UnexpectedEnd {
            offset: 20,
            needed: 3,
        });
        assert!(err.to_string().starts_with("Malformed global table"));
        assert!(err.is_truncated());
    }

    #[test]
    fn test_invalid_magic_is_not_truncation() {
        assert!(!FormatError::InvalidMagic.is_truncated());
    }
}
