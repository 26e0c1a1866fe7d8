//! Embedding-specific error types.

use std::fmt::Display;

use mosaic_core::{ContentType, UnknownContentType};
use thiserror::Error;

fn join<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn input_mismatch_display(given: &[String], expected: &[String], mandatory: &[String]) -> String {
    format!(
        "The input parameters do not match the model's expectations.\nInput names: {}\nExpected: {} (where {} are mandatory)",
        join(given),
        join(expected),
        join(mandatory)
    )
}

fn dimension_mismatch_display(sizes: &[(ContentType, usize)]) -> String {
    let sizes: Vec<String> = sizes.iter().map(|(ty, dims)| format!("{ty}: {dims}")).collect();
    format!(
        "Some of the models are using a different embedding size. They should all match. Embedding sizes by model: {}",
        sizes.join(", ")
    )
}

/// Errors raised while loading models or computing embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Image decoding failed: {0}")]
    ImageDecode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("{}", input_mismatch_display(.given, .expected, .mandatory))]
    InputMismatch {
        given: Vec<String>,
        expected: Vec<String>,
        mandatory: Vec<String>,
    },

    #[error(
        "The type of the given model (name/path: {model}, detected type: {detected}) is not supported or was not correctly identified. Supported model types: {}",
        join(.supported)
    )]
    UnsupportedArchitecture {
        model: String,
        detected: String,
        supported: Vec<String>,
    },

    #[error("{}", dimension_mismatch_display(.sizes))]
    DimensionMismatch { sizes: Vec<(ContentType, usize)> },

    #[error(
        "Features were produced for {content_type} data, but no model handling it was initialized. Initialized models: {}",
        join(.initialized)
    )]
    MissingModel {
        content_type: ContentType,
        initialized: Vec<ContentType>,
    },

    #[error(
        "Could not extract features for data of type {0}. Check that the feature extractor is correct for this data type"
    )]
    EmptyFeatures(ContentType),

    #[error("Document '{id}' has content type '{content_type}' but carries {found} content")]
    ContentMismatch {
        id: String,
        content_type: ContentType,
        found: &'static str,
    },

    #[error(transparent)]
    UnknownContentType(#[from] UnknownContentType),
}

impl EmbeddingError {
    /// Returns `true` if the error is potentially transient and the operation could be retried.
    ///
    /// Embedding errors are permanent (model, configuration or input problems), so this
    /// always returns `false`.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<EmbeddingError> for mosaic_core::CoreError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::UnknownContentType(inner) => Self::UnknownContentType(inner),
            other => Self::Embedding {
                message: other.to_string(),
            },
        }
    }
}
