//! Error types for the wire protocol

use thiserror::Error;

use crate::field::FieldType;

/// Wire protocol error types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Declared wire type does not match the type expected for the tag
    #[error("Type mismatch for field {tag}: expected {expected}, found {actual}")]
    TypeMismatch {
        tag: u16,
        expected: FieldType,
        actual: FieldType,
    },

    /// Stream ended before the current field was complete
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Type byte outside the known field type enumeration
    #[error("Unknown field type: {0:#04x}")]
    UnknownFieldType(u8),

    /// Varint ran past the width of its target integer
    #[error("Varint overflow")]
    VarintOverflow,

    /// String field did not contain valid UTF-8
    #[error("Invalid UTF-8 in field {0}")]
    InvalidUtf8(u16),

    /// Nested structures, lists or maps exceed the depth limit
    #[error("Nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Frame length prefix exceeds the configured bound
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// Envelope carried an operation this build does not know
    #[error("Unknown operation: {0}")]
    UnknownOp(i16),
}

impl WireError {
    /// Whether the stream position can no longer be trusted.
    ///
    /// A desynchronised stream cannot be recovered because structures carry
    /// no length prefix; the owning connection must be torn down.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            WireError::Truncated { .. }
                | WireError::UnknownFieldType(_)
                | WireError::VarintOverflow
                | WireError::NestingTooDeep(_)
                | WireError::FrameTooLarge { .. }
        )
    }
}

/// Result alias for codec operations
pub type WireResult<T> = Result<T, WireError>;
