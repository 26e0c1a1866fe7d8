//! Deterministic stand-ins for pretrained checkpoints.
//!
//! Text is embedded as a bag of hashed words, so texts sharing words score
//! higher under dot product. Images are embedded from a `2x2` thumbnail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use candle_core::{DType, Device, Tensor};
use candle_nn::Linear;
use image::imageops::FilterType;
use mosaic_core::ContentType;
use mosaic_embedding::{
    EmbeddingError, EncoderOutput, ExtractionParams, FeatureBatch, FeatureExtractor, LoadOptions,
    ModelConfig, ModelLoader, ModelParams, Payload, PretrainedEncoder, SentenceEncoder,
};

/// BERT-style text checkpoint with a built-in pooler.
pub const TEXT_768: &str = "mock/text-768";
/// data2vec text checkpoint, served by the pooler-augmented wrapper.
pub const DATA2VEC_TEXT_768: &str = "mock/data2vec-text-768";
/// ViT checkpoint sharing the text space width.
pub const VISION_768: &str = "mock/vision-768";
/// ViT checkpoint whose width matches no text model.
pub const VISION_512: &str = "mock/vision-512";
/// Checkpoint declaring an architecture family no wrapper is registered for.
pub const UNKNOWN_ARCH_768: &str = "mock/unknown-arch-768";
/// Self-contained sentence encoder.
pub const SENTENCE_384: &str = "sentence-transformers/mock-384";

const THUMBNAIL: u32 = 2;

/// FNV-1a hash of a lowercased token with non-alphanumeric characters removed.
pub fn hash_token(token: &str) -> u32 {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .fold(0x811c_9dc5_u32, |hash, c| (hash ^ u32::from(c)).wrapping_mul(0x0100_0193))
}

fn tokenize(text: &str) -> Vec<u32> {
    text.split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(hash_token)
        .collect()
}

fn bag_of_tokens(ids: impl IntoIterator<Item = u32>, dims: usize) -> Vec<f32> {
    let mut bag = vec![0.0; dims];
    for id in ids {
        bag[id as usize % dims] += 1.0;
    }
    bag
}

#[derive(Debug, Clone)]
struct MockModel {
    model_type: String,
    dims: usize,
}

/// Loader serving registered mock checkpoints.
#[derive(Debug, Default)]
pub struct MockModelLoader {
    models: HashMap<String, MockModel>,
    encoder_loads: AtomicUsize,
}

impl MockModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader with every checkpoint constant of this module registered.
    pub fn standard() -> Self {
        Self::new()
            .with_model(TEXT_768, "bert", 768)
            .with_model(DATA2VEC_TEXT_768, "data2vec-text", 768)
            .with_model(VISION_768, "vit", 768)
            .with_model(VISION_512, "vit", 512)
            .with_model(UNKNOWN_ARCH_768, "fancy-new-encoder", 768)
            .with_model(SENTENCE_384, "", 384)
    }

    /// Registers `name` as a checkpoint of `model_type` producing `dims`-wide embeddings.
    #[must_use]
    pub fn with_model(
        mut self,
        name: impl Into<String>,
        model_type: impl Into<String>,
        dims: usize,
    ) -> Self {
        self.models.insert(
            name.into(),
            MockModel {
                model_type: model_type.into(),
                dims,
            },
        );
        self
    }

    /// Number of encoders and sentence encoders loaded so far, replicas included.
    pub fn encoder_loads(&self) -> usize {
        self.encoder_loads.load(Ordering::SeqCst)
    }

    fn model(&self, name: &str) -> Result<&MockModel, EmbeddingError> {
        self.models
            .get(name)
            .ok_or_else(|| {
                EmbeddingError::ModelLoad(format!("mock model '{name}' is not registered"))
            })
    }
}

impl ModelLoader for MockModelLoader {
    fn load_config(
        &self,
        model: &str,
        _options: &LoadOptions,
    ) -> Result<ModelConfig, EmbeddingError> {
        let mock = self.model(model)?;
        Ok(ModelConfig {
            model_type: mock.model_type.clone(),
            hidden_size: Some(mock.dims),
            ..ModelConfig::default()
        })
    }

    fn load_encoder(
        &self,
        model: &str,
        architecture: &str,
        _params: &ModelParams,
        options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn PretrainedEncoder>, EmbeddingError> {
        let config = self.load_config(model, options)?;
        self.encoder_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEncoder {
            config,
            architecture: architecture.to_owned(),
            device: device.clone(),
        }))
    }

    fn load_sentence_encoder(
        &self,
        model: &str,
        _content_type: ContentType,
        _options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn SentenceEncoder>, EmbeddingError> {
        let dims = self.model(model)?.dims;
        self.encoder_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSentenceEncoder {
            dims,
            device: device.clone(),
        }))
    }

    fn load_feature_extractor(
        &self,
        model: &str,
        content_type: ContentType,
        _options: &LoadOptions,
    ) -> Result<Box<dyn FeatureExtractor>, EmbeddingError> {
        self.model(model)?;
        Ok(match content_type {
            ContentType::Text | ContentType::Table => Box::new(MockTextExtractor),
            ContentType::Image => Box::new(MockImageExtractor),
        })
    }
}

/// Pretrained encoder computing bag-of-token or thumbnail embeddings.
///
/// Only the data2vec question-answering head lacks a pooled output, matching
/// the real checkpoints.
struct MockEncoder {
    config: ModelConfig,
    architecture: String,
    device: Device,
}

impl MockEncoder {
    fn dims(&self) -> usize {
        self.config.hidden_size.unwrap_or(1)
    }

    fn encode_text(&self, features: &FeatureBatch) -> candle_core::Result<(Tensor, Tensor)> {
        let dims = self.dims();
        let ids: Vec<Vec<u32>> = features
            .get("input_ids")
            .ok_or_else(|| candle_core::Error::Msg("missing input_ids".into()))?
            .to_vec2()?;
        let mask: Vec<Vec<u32>> = match features.get("attention_mask") {
            Some(mask) => mask.to_vec2()?,
            None => ids.iter().map(|row| vec![1; row.len()]).collect(),
        };
        let seq = ids.first().map_or(0, Vec::len);

        let mut hidden = Vec::with_capacity(ids.len() * seq * dims);
        let mut pooled = Vec::with_capacity(ids.len() * dims);
        for (row, row_mask) in ids.iter().zip(&mask) {
            let attended = row.iter().zip(row_mask).filter(|(_, m)| **m == 1).map(|(id, _)| *id);
            let bag = bag_of_tokens(attended, dims);
            hidden.extend_from_slice(&bag);
            for &id in row.iter().skip(1) {
                hidden.extend(bag_of_tokens([id], dims));
            }
            pooled.extend(bag);
        }
        let hidden = Tensor::from_vec(hidden, (ids.len(), seq, dims), &self.device)?;
        let pooled = Tensor::from_vec(pooled, (ids.len(), dims), &self.device)?;
        Ok((hidden, pooled))
    }

    fn encode_pixels(&self, pixel_values: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let dims = self.dims();
        let rows: Vec<Vec<f32>> = pixel_values.flatten_from(1)?.to_vec2()?;
        let mut pooled = Vec::with_capacity(rows.len() * dims);
        for row in &rows {
            let width = row.len().max(1);
            pooled.extend((0..dims).map(|j| row.get(j % width).copied().unwrap_or_default()));
        }
        let pooled = Tensor::from_vec(pooled, (rows.len(), dims), &self.device)?;
        Ok((pooled.unsqueeze(1)?, pooled))
    }
}

impl PretrainedEncoder for MockEncoder {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, features: &FeatureBatch) -> candle_core::Result<EncoderOutput> {
        let (last_hidden_state, pooled) = match features.get("pixel_values") {
            Some(pixels) => self.encode_pixels(pixels)?,
            None => self.encode_text(features)?,
        };
        let pooler_output =
            (self.architecture != "Data2VecTextForQuestionAnswering").then_some(pooled);
        Ok(EncoderOutput {
            last_hidden_state,
            pooler_output,
        })
    }

    /// Identity projection so freshly attached poolers are reproducible.
    fn init_linear(&self, in_dim: usize, out_dim: usize) -> candle_core::Result<Linear> {
        let weight =
            Tensor::eye(out_dim, DType::F32, &self.device)?.narrow(1, 0, in_dim.min(out_dim))?;
        let bias = Tensor::zeros(out_dim, DType::F32, &self.device)?;
        Ok(Linear::new(weight, Some(bias)))
    }
}

struct MockSentenceEncoder {
    dims: usize,
    device: Device,
}

impl SentenceEncoder for MockSentenceEncoder {
    fn output_dims(&self) -> usize {
        self.dims
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn encode(&self, data: &[Payload]) -> candle_core::Result<Tensor> {
        let mut values = Vec::with_capacity(data.len() * self.dims);
        for payload in data {
            let text = payload
                .as_text()
                .ok_or_else(|| {
                    candle_core::Error::Msg("mock sentence encoder only embeds text".into())
                })?;
            values.extend(bag_of_tokens(tokenize(text), self.dims));
        }
        Tensor::from_vec(values, (data.len(), self.dims), &self.device)
    }
}

/// Whitespace tokenizer emitting hashed word ids, right-truncated and padded to the longest row.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockTextExtractor;

impl FeatureExtractor for MockTextExtractor {
    fn extract(
        &self,
        data: &[Payload],
        params: &ExtractionParams,
    ) -> Result<FeatureBatch, EmbeddingError> {
        if params.max_length == 0 {
            return Err(EmbeddingError::InvalidInput("max_length must be greater than 0".into()));
        }
        let rows = data
            .iter()
            .map(|payload| {
                payload
                    .as_text()
                    .map(|text| {
                        tokenize(text).into_iter().take(params.max_length).collect::<Vec<_>>()
                    })
                    .ok_or_else(|| EmbeddingError::Tokenization("expected a text payload".into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let seq = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);

        let mut ids = Vec::with_capacity(rows.len() * seq);
        let mut mask = Vec::with_capacity(rows.len() * seq);
        for row in &rows {
            ids.extend(row.iter().copied().chain(std::iter::repeat(0)).take(seq));
            mask.extend((0..seq).map(|i| u32::from(i < row.len())));
        }
        let shape = (rows.len(), seq);
        let tensor = |values: Vec<u32>| {
            Tensor::from_vec(values, shape, &Device::Cpu)
                .map_err(|e| EmbeddingError::Tokenization(e.to_string()))
        };
        Ok(FeatureBatch::new()
            .with("input_ids", tensor(ids)?)
            .with("token_type_ids", tensor(vec![0; rows.len() * seq])?)
            .with("attention_mask", tensor(mask)?))
    }
}

/// Shrinks every image to a `2x2` RGB thumbnail scaled to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockImageExtractor;

impl FeatureExtractor for MockImageExtractor {
    fn extract(
        &self,
        data: &[Payload],
        _params: &ExtractionParams,
    ) -> Result<FeatureBatch, EmbeddingError> {
        let side = THUMBNAIL as usize;
        let mut values = Vec::with_capacity(data.len() * 3 * side * side);
        for payload in data {
            let image = payload
                .as_image()
                .ok_or_else(|| EmbeddingError::ImageDecode("expected an image payload".into()))?;
            let thumbnail = image.resize_exact(THUMBNAIL, THUMBNAIL, FilterType::Nearest).to_rgb8();
            for channel in 0..3 {
                values.extend(thumbnail.pixels().map(|p| f32::from(p.0[channel]) / 255.0));
            }
        }
        let pixel_values = Tensor::from_vec(values, (data.len(), 3, side, side), &Device::Cpu)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
        Ok(FeatureBatch::new().with("pixel_values", pixel_values))
    }
}
