//! Error types for buffer, envelope and wire conversion failures.

use crate::buffer::ElementType;

/// Failure while building or reading a typed buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("unsupported buffer element type `{0}`")]
    UnsupportedType(String),

    #[error("buffer range {byte_offset}+{byte_length} exceeds backing memory of {capacity} bytes")]
    BufferBounds {
        byte_offset: usize,
        byte_length: usize,
        capacity: usize,
    },

    #[error("byte length {byte_length} is not a multiple of the {element_type} element size")]
    Misaligned {
        element_type: ElementType,
        byte_length: usize,
    },

    #[error("buffer holds {actual} elements, not {expected}")]
    TypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },
}

/// Failure while validating a message coming from the host.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Failure while encoding or decoding the JSON wire form, or converting
/// to and from `jupyter_protocol` messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 buffer: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("invalid header date `{date}`: {source}")]
    Date {
        date: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to parse message content: {0}")]
    Content(String),
}
