//! Error types for the validation library.
//!
//! Only structural problems with the input container and caller
//! misconfiguration are reported through [`Error`]. Anything about the
//! trustworthiness of a document (bad digests, broken chains, revoked
//! certificates) is recorded as a finding in the diagnostic data instead.

/// Result type alias for validation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading documents and building trust graphs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The byte stream is not the expected container (e.g. missing '%PDF-')
    #[error("Document not supported: {0}")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CMS structure could not be decoded
    #[error("CMS error: {0}")]
    Cms(String),

    /// X.509 certificate could not be decoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Revocation data could not be decoded
    #[error("Revocation data error: {0}")]
    Revocation(String),

    /// Read attempted on a closed byte-range stream
    #[error("Stream closed")]
    StreamClosed,

    /// Caller misconfiguration (missing certificate verifier, zero walk bound, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Same public key registered with a conflicting subject key identifier
    #[error("Certificate pool consistency error: {0}")]
    PoolConsistency(String),

    /// Unsupported feature or algorithm
    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Cms(err.to_string())
    }
}
