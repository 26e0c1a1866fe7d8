//! Seams to pretrained checkpoints: configuration, raw encoders and self-contained
//! sentence encoders.

use candle_core::{DType, Device, Tensor};
use candle_nn::Linear;
use serde::{Deserialize, Serialize};

use crate::features::{FeatureBatch, Payload};

/// Keyword parameters used to construct a pretrained model.
pub type ModelParams = serde_json::Map<String, serde_json::Value>;

fn default_initializer_range() -> f64 {
    0.02
}

/// Vision tower settings nested in multimodal checkpoint configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub hidden_size: Option<usize>,
}

/// The subset of a checkpoint's `config.json` the wrappers rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Architecture family as declared by the checkpoint, e.g. `data2vec-text`.
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub hidden_size: Option<usize>,
    /// Hidden size under its encoder-decoder name.
    #[serde(default)]
    pub d_model: Option<usize>,
    #[serde(default)]
    pub vision_config: Option<VisionConfig>,
    /// Standard deviation used to initialize freshly created layers.
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: String::new(),
            hidden_size: None,
            d_model: None,
            vision_config: None,
            initializer_range: default_initializer_range(),
            extra: serde_json::Map::new(),
        }
    }
}

impl ModelConfig {
    /// Width of the text encoder output.
    pub fn text_hidden_size(&self) -> Option<usize> {
        self.hidden_size.or(self.d_model)
    }

    /// Width of the vision encoder output, preferring the nested vision tower.
    pub fn vision_hidden_size(&self) -> Option<usize> {
        self.vision_config
            .as_ref()
            .and_then(|v| v.hidden_size)
            .or(self.hidden_size)
    }
}

/// Raw outputs of a pretrained encoder's forward pass.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// `[batch, seq_len, hidden]`
    pub last_hidden_state: Tensor,
    /// `[batch, hidden]`, present only for architectures with a built-in pooler.
    pub pooler_output: Option<Tensor>,
}

/// A loaded pretrained checkpoint that consumes named feature tensors.
///
/// Runs in inference mode only.
pub trait PretrainedEncoder: Send + Sync {
    fn config(&self) -> &ModelConfig;

    fn device(&self) -> &Device;

    fn forward(&self, features: &FeatureBatch) -> candle_core::Result<EncoderOutput>;

    /// Creates a dense layer with this model's weight initialization scheme.
    ///
    /// The default draws weights from `N(0, initializer_range)` and zeroes the bias.
    #[allow(clippy::cast_possible_truncation)]
    fn init_linear(&self, in_dim: usize, out_dim: usize) -> candle_core::Result<Linear> {
        let std = self.config().initializer_range as f32;
        let weight = Tensor::randn(0f32, std, (out_dim, in_dim), self.device())?;
        let bias = Tensor::zeros(out_dim, DType::F32, self.device())?;
        Ok(Linear::new(weight, Some(bias)))
    }
}

/// A self-contained embedding model that handles its own preprocessing.
pub trait SentenceEncoder: Send + Sync {
    fn output_dims(&self) -> usize;

    fn device(&self) -> &Device;

    /// Embeds raw payloads into a `[batch, output_dims]` tensor.
    fn encode(&self, data: &[Payload]) -> candle_core::Result<Tensor>;
}
