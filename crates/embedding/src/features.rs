//! Raw payloads, named feature tensors and the feature extractor seam.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use image::DynamicImage;
use mosaic_core::ContentType;

use crate::config::ExtractionParams;
use crate::error::EmbeddingError;

/// Content converted from a document, ready for feature extraction.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Image(DynamicImage),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&DynamicImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::Text(_) => None,
        }
    }
}

/// Named input tensors for one forward pass, each of shape `[batch, ...]`.
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    tensors: BTreeMap<String, Tensor>,
}

impl FeatureBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Returns the tensor for a slot the model declared as mandatory.
    pub fn require(&self, name: &str) -> Result<&Tensor, EmbeddingError> {
        self.get(name)
            .ok_or_else(|| EmbeddingError::InvalidInput(format!("missing input tensor '{name}'")))
    }

    /// Slot names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Number of rows, read from the leading dimension of the first slot.
    pub fn batch_size(&self) -> Result<usize, EmbeddingError> {
        let (name, tensor) = self
            .tensors
            .iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidInput("feature batch is empty".into()))?;
        tensor
            .dim(0)
            .map_err(|e| {
                EmbeddingError::InvalidInput(format!(
                    "feature '{name}' has no batch dimension: {e}"
                ))
            })
    }

    /// Copies every tensor to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self, EmbeddingError> {
        let tensors = self
            .tensors
            .iter()
            .map(|(name, t)| {
                t.to_device(device)
                    .map(|t| (name.clone(), t))
                    .map_err(|e| {
                        EmbeddingError::Device(format!("moving '{name}' to {device:?}: {e}"))
                    })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { tensors })
    }

    /// Rows `start..start + len` of every tensor.
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self, EmbeddingError> {
        let tensors = self
            .tensors
            .iter()
            .map(|(name, t)| {
                t.narrow(0, start, len)
                    .map(|t| (name.clone(), t))
                    .map_err(|e| EmbeddingError::Inference(format!("splitting '{name}': {e}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { tensors })
    }
}

/// Turns raw payloads of one content type into named tensors for a model.
pub trait FeatureExtractor: Send + Sync {
    fn extract(
        &self,
        data: &[Payload],
        params: &ExtractionParams,
    ) -> Result<FeatureBatch, EmbeddingError>;
}

/// Runs `extractor` after checking every payload has the shape expected for `content_type`.
///
/// Text and tables are both handled as text samples, images as image samples.
pub fn get_features(
    data: &[Payload],
    content_type: ContentType,
    extractor: &dyn FeatureExtractor,
    params: &ExtractionParams,
) -> Result<FeatureBatch, EmbeddingError> {
    let expected = match content_type {
        ContentType::Text | ContentType::Table => "text",
        ContentType::Image => "image",
    };
    if let Some(bad) = data.iter().find(|p| p.kind() != expected) {
        return Err(EmbeddingError::InvalidInput(format!(
            "{content_type} samples expect {expected} payloads, got {}",
            bad.kind()
        )));
    }
    extractor.extract(data, params)
}
