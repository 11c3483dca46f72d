//! Value errors

use thiserror::Error;

use crate::value::Tag;

/// Errors raised when a value is read or assigned incorrectly
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Payload read under the wrong tag
    #[error("value {actual} cannot be used as {expected}")]
    TagMismatch {
        /// Tag the caller asked for
        expected: Tag,
        /// Tag the value actually carries
        actual: Tag,
    },

    /// Enum value outside its declared domain
    #[error("`{value}` is not a member of enum {type_name}")]
    NotInDomain {
        /// Enum type name
        type_name: String,
        /// Offending value
        value: String,
    },

    /// Enum value of one type assigned where another type is declared
    #[error("enum {expected} cannot hold a value of enum {actual}")]
    WrongEnumType {
        /// Declared enum type
        expected: String,
        /// Type carried by the assigned value
        actual: String,
    },

    /// Sequential enum moved backwards
    #[error("sequential enum {type_name} cannot move from `{from}` back to `{to}`")]
    SequenceRegression {
        /// Enum type name
        type_name: String,
        /// Current value
        from: String,
        /// Rejected value
        to: String,
    },

    /// JSON document that has no value mapping
    #[error("unsupported JSON value: {0}")]
    UnsupportedJson(String),
}

/// Errors raised while decoding the wire form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before a field was complete
    #[error("unexpected end of input at offset {offset} (needed {needed} more bytes)")]
    UnexpectedEnd {
        /// Offset where the read started
        offset: usize,
        /// Bytes missing
        needed: usize,
    },

    /// Unknown value tag
    #[error("invalid value tag {tag:#04x} at offset {offset}")]
    InvalidTag {
        /// Tag byte
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },

    /// Boolean payload other than 0 or 1
    #[error("invalid boolean byte {byte:#04x} at offset {offset}")]
    InvalidBool {
        /// Payload byte
        byte: u8,
        /// Offset of the payload byte
        offset: usize,
    },

    /// String payload is not UTF-8
    #[error("invalid UTF-8 at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string bytes
        offset: usize,
    },

    /// Collections nested deeper than the decoder allows
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),

    /// Set contains the same member twice
    #[error("duplicate set member at offset {0}")]
    DuplicateMember(usize),

    /// Map contains the same key twice
    #[error("duplicate map key at offset {0}")]
    DuplicateKey(usize),

    /// Set or map declares more entries than the decoder accepts
    #[error("collection of {count} entries at offset {offset} exceeds the limit of {limit}")]
    TooManyEntries {
        /// Declared entry count
        count: usize,
        /// Limit that applied
        limit: usize,
        /// Offset of the count field
        offset: usize,
    },

    /// Bytes left over after a complete value
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Result type for value operations
pub type ValueResult<T> = std::result::Result<T, ValueError>;

/// Result type for wire decoding
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_mismatch_display() {
        let err = ValueError::TagMismatch {
            expected: Tag::Bool,
            actual: Tag::Number,
        };
        assert_eq!(err.to_string(), "value Number cannot be used as Bool");
    }

    #[test]
    fn test_unexpected_end_display() {
        let err = DecodeError::UnexpectedEnd {
            offset: 12,
            needed: 4,
        };
        assert!(err.to_string().contains("offset 12"));
    }
}
