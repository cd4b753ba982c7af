//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or decoding protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame header is malformed (declared length shorter than the header itself)
    #[error("Invalid frame header: declared length {0} is shorter than the header")]
    InvalidHeader(u32),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Incomplete frame received
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Property-list document could not be encoded or decoded
    #[error("Document error: {0}")]
    Document(#[from] plist::Error),

    /// A decoded document did not have the expected shape
    #[error("Unexpected document: {0}")]
    UnexpectedDocument(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
