//! Error types for document stores.

use thiserror::Error;

/// Errors specific to document store operations.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error(
        "Embedding dimension mismatch: store holds {expected}-dimensional vectors, got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DocumentStoreError {
    /// Returns `true` if the error is potentially transient and the operation could be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<serde_json::Error> for DocumentStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<DocumentStoreError> for mosaic_core::CoreError {
    fn from(err: DocumentStoreError) -> Self {
        Self::DocumentStore {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Display Tests ===

    #[test]
    fn storage_error_displays_message() {
        let err = DocumentStoreError::Storage("disk full".into());
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn not_found_displays_message() {
        let err = DocumentStoreError::NotFound("doc_123".into());
        assert_eq!(err.to_string(), "Document not found: doc_123");
    }

    #[test]
    fn dimension_mismatch_names_both_sizes() {
        let err = DocumentStoreError::DimensionMismatch {
            expected: 768,
            actual: 512,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: store holds 768-dimensional vectors, got 512"
        );
    }

    // === Retryable Tests ===

    #[test]
    fn storage_error_is_retryable() {
        assert!(DocumentStoreError::Storage("timeout".into()).is_retryable());
    }

    #[test]
    fn input_errors_are_not_retryable() {
        assert!(!DocumentStoreError::InvalidInput("empty".into()).is_retryable());
        assert!(!DocumentStoreError::NotFound("id".into()).is_retryable());
        assert!(!DocumentStoreError::Serialization("bad".into()).is_retryable());
    }

    // === CoreError Conversion ===

    #[test]
    fn conversion_preserves_message_and_retryability() {
        let core_err: mosaic_core::CoreError = DocumentStoreError::Storage("io".into()).into();
        match core_err {
            mosaic_core::CoreError::DocumentStore { message, retryable } => {
                assert_eq!(message, "Storage error: io");
                assert!(retryable);
            }
            other => panic!("Expected CoreError::DocumentStore, got {other:?}"),
        }
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let err: DocumentStoreError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, DocumentStoreError::Serialization(_)));
    }
}
