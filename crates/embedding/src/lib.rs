//! Mosaic Embedding - multimodal document embedding.
//!
//! A [`MultiModalEmbedder`] owns one model per content type and turns a batch
//! of text, table and image documents into a single embedding matrix whose
//! rows follow the input order.

pub mod config;
pub mod convert;
pub mod device;
pub mod embedder;
pub mod encoder;
pub mod error;
pub mod features;
pub mod image_extractor;
pub mod language_model;
pub mod loader;
pub mod ops;
pub mod parallel;
pub mod pretrained;
pub mod registry;
pub mod text_extractor;

pub use config::{EmbedderConfig, ExtractionParams};
pub use embedder::{Encoder, MultiModalEmbedder, is_sentence_encoder};
pub use encoder::{EncoderOutput, ModelConfig, ModelParams, PretrainedEncoder, SentenceEncoder};
pub use error::EmbeddingError;
pub use features::{FeatureBatch, FeatureExtractor, Payload};
pub use language_model::{ExpectedInputs, LanguageModel};
pub use loader::{LoadOptions, LocalModelLoader, ModelLoader};
