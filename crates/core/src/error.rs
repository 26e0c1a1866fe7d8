//! Error types shared across the mosaic crates.

use thiserror::Error;

use crate::document::ContentType;

/// A document carried a content type tag outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Unknown content type '{0}'. Known types: {supported}",
    supported = ContentType::supported()
)]
pub struct UnknownContentType(pub String);

/// Top-level error aggregating the failures of every mosaic crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    #[error("Document store error: {message}")]
    DocumentStore { message: String, retryable: bool },

    #[error("Retriever error: {message}")]
    Retriever { message: String },

    #[error(transparent)]
    UnknownContentType(#[from] UnknownContentType),
}

impl CoreError {
    /// Returns `true` if the error is potentially transient and the operation could be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DocumentStore { retryable, .. } => *retryable,
            Self::Embedding { .. } | Self::Retriever { .. } | Self::UnknownContentType(_) => false,
        }
    }
}
