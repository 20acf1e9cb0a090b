//! Protocol error types

use thiserror::Error;

/// Errors that can occur while parsing records or operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Record line had no content
    #[error("Empty record")]
    EmptyRecord,

    /// First field of a record is not a template number
    #[error("Invalid template code: {0:?}")]
    InvalidTemplate(String),

    /// A quoted field was never closed
    #[error("Unterminated quoted field in record")]
    UnterminatedQuote,

    /// Operation JSON could not be decoded
    #[error("Invalid operation: {0}")]
    InvalidOperation(#[from] serde_json::Error),

    /// Operation does not carry the requested fragment
    #[error("Operation has no {0} fragment")]
    MissingFragment(String),

    /// Fragment is present but does not have the expected shape
    #[error("Invalid {fragment} fragment: {source}")]
    InvalidFragment {
        fragment: String,
        #[source]
        source: serde_json::Error,
    },
}
