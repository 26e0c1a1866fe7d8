//! Error types for retrieval.

use mosaic_document_store::DocumentStoreError;
use mosaic_embedding::EmbeddingError;
use thiserror::Error;

/// Errors raised while retrieving documents.
#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error(
        "Number of filters ({filters}) does not match number of queries ({queries}). Please provide as many \
         filters as queries, or a single filter that will be applied to all queries."
    )]
    FilterCountMismatch { filters: usize, queries: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] DocumentStoreError),

    #[error("Embedding task failed: {0}")]
    Task(String),
}

impl RetrieverError {
    /// Returns `true` if the error is potentially transient and the operation could be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            Self::Embedding(err) => err.is_retryable(),
            Self::FilterCountMismatch { .. } | Self::InvalidInput(_) | Self::Task(_) => false,
        }
    }
}

impl From<RetrieverError> for mosaic_core::CoreError {
    fn from(err: RetrieverError) -> Self {
        match err {
            RetrieverError::Embedding(inner) => inner.into(),
            RetrieverError::Store(inner) => inner.into(),
            other => Self::Retriever {
                message: other.to_string(),
            },
        }
    }
}
