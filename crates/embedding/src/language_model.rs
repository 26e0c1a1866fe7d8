//! Uniform wrappers around pretrained encoders.
//!
//! Every wrapper exposes the same `forward(features) -> [batch, output_dims]`
//! contract. Inputs are validated against the wrapper's declared slots before
//! any tensor computation happens, then handed to the variant's inference hook:
//!
//! - models with a built-in pooler return it as-is,
//! - models without one get a first-token pooler with a dense projection,
//!   initialized with the model's own weight-init scheme.

use std::collections::BTreeSet;

use candle_core::{Device, IndexOp, Module, Tensor};
use candle_nn::Linear;

use crate::encoder::PretrainedEncoder;
use crate::error::EmbeddingError;
use crate::features::FeatureBatch;

/// Input slots a model accepts, split into mandatory and optional names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedInputs {
    pub mandatory: &'static [&'static str],
    pub optional: &'static [&'static str],
}

/// Slots produced by tokenizers for text encoders.
pub const TEXT_INPUTS: ExpectedInputs = ExpectedInputs {
    mandatory: &["input_ids", "token_type_ids", "attention_mask"],
    optional: &[],
};

/// Slots produced by image processors for vision encoders.
pub const IMAGE_INPUTS: ExpectedInputs = ExpectedInputs {
    mandatory: &["pixel_values"],
    optional: &["bool_masked_pos", "head_mask"],
};

impl ExpectedInputs {
    /// Checks that `given` holds every mandatory slot and nothing outside mandatory ∪ optional.
    pub fn validate<'a>(
        &self,
        given: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), EmbeddingError> {
        let given: BTreeSet<&str> = given.into_iter().collect();
        let mandatory: BTreeSet<&str> = self.mandatory.iter().copied().collect();
        let all: BTreeSet<&str> = mandatory.iter().chain(self.optional).copied().collect();

        if given.is_superset(&mandatory) && given.is_subset(&all) {
            return Ok(());
        }
        Err(EmbeddingError::InputMismatch {
            given: given.into_iter().map(str::to_owned).collect(),
            expected: all.into_iter().map(str::to_owned).collect(),
            mandatory: mandatory.into_iter().map(str::to_owned).collect(),
        })
    }
}

/// A pretrained model normalized to produce one pooled vector per input.
pub trait LanguageModel: Send + Sync {
    /// Canonical architecture key the model was loaded as.
    fn model_type(&self) -> &str;

    fn expected_inputs(&self) -> ExpectedInputs;

    /// Width of the embeddings returned by `forward`, fixed at load time.
    fn output_dims(&self) -> usize;

    fn device(&self) -> &Device;

    /// Validates the input names, then runs inference.
    fn forward(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
        self.expected_inputs().validate(features.names())?;
        self.forward_validated(features)
    }

    /// Inference hook, called only with validated inputs. Returns `[batch, output_dims]`.
    fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError>;
}

fn encode(
    model_type: &str,
    encoder: &dyn PretrainedEncoder,
    features: &FeatureBatch,
) -> Result<crate::encoder::EncoderOutput, EmbeddingError> {
    encoder
        .forward(features)
        .map_err(|e| EmbeddingError::Inference(format!("{model_type} forward: {e}")))
}

fn native_pooled_output(
    model_type: &str,
    encoder: &dyn PretrainedEncoder,
    features: &FeatureBatch,
) -> Result<Tensor, EmbeddingError> {
    encode(model_type, encoder, features)?
        .pooler_output
        .ok_or_else(|| {
            EmbeddingError::Inference(format!(
                "{model_type} did not return a pooled output; load it with a pooling layer or use a pooler-augmented wrapper"
            ))
        })
}

fn dims_or_err(model_type: &str, dims: Option<usize>) -> Result<usize, EmbeddingError> {
    match dims {
        Some(d) if d > 0 => Ok(d),
        _ => Err(EmbeddingError::ModelLoad(format!(
            "cannot determine output dimensions of {model_type} from its configuration"
        ))),
    }
}

/// Summarizes a sequence by projecting its first token.
#[derive(Debug, Clone)]
pub struct FirstTokenPooler {
    proj: Linear,
}

impl FirstTokenPooler {
    /// Creates a `hidden x hidden` projection initialized by `encoder`.
    pub fn new(encoder: &dyn PretrainedEncoder, hidden: usize) -> Result<Self, EmbeddingError> {
        let proj = encoder
            .init_linear(hidden, hidden)
            .map_err(|e| EmbeddingError::ModelLoad(format!("pooler init: {e}")))?;
        Ok(Self { proj })
    }

    pub fn from_linear(proj: Linear) -> Self {
        Self { proj }
    }
}

impl Module for FirstTokenPooler {
    fn forward(&self, hidden_states: &Tensor) -> candle_core::Result<Tensor> {
        let first = hidden_states.i((.., 0))?.contiguous()?;
        self.proj.forward(&first)
    }
}

/// Text encoder with a built-in pooler.
pub struct TextLanguageModel {
    model_type: String,
    encoder: Box<dyn PretrainedEncoder>,
    output_dims: usize,
}

impl TextLanguageModel {
    pub fn new(
        model_type: impl Into<String>,
        encoder: Box<dyn PretrainedEncoder>,
    ) -> Result<Self, EmbeddingError> {
        let model_type = model_type.into();
        let output_dims = dims_or_err(&model_type, encoder.config().text_hidden_size())?;
        Ok(Self {
            model_type,
            encoder,
            output_dims,
        })
    }
}

impl LanguageModel for TextLanguageModel {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn expected_inputs(&self) -> ExpectedInputs {
        TEXT_INPUTS
    }

    fn output_dims(&self) -> usize {
        self.output_dims
    }

    fn device(&self) -> &Device {
        self.encoder.device()
    }

    fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
        native_pooled_output(&self.model_type, self.encoder.as_ref(), features)
    }
}

/// Text encoder without a built-in pooler, given a [`FirstTokenPooler`].
pub struct TextLanguageModelPlusPooler {
    model_type: String,
    encoder: Box<dyn PretrainedEncoder>,
    pooler: FirstTokenPooler,
    output_dims: usize,
}

impl TextLanguageModelPlusPooler {
    pub fn new(
        model_type: impl Into<String>,
        encoder: Box<dyn PretrainedEncoder>,
    ) -> Result<Self, EmbeddingError> {
        let model_type = model_type.into();
        let output_dims = dims_or_err(&model_type, encoder.config().text_hidden_size())?;
        let pooler = FirstTokenPooler::new(encoder.as_ref(), output_dims)?;
        Ok(Self {
            model_type,
            encoder,
            pooler,
            output_dims,
        })
    }
}

impl LanguageModel for TextLanguageModelPlusPooler {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn expected_inputs(&self) -> ExpectedInputs {
        TEXT_INPUTS
    }

    fn output_dims(&self) -> usize {
        self.output_dims
    }

    fn device(&self) -> &Device {
        self.encoder.device()
    }

    fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
        let output = encode(&self.model_type, self.encoder.as_ref(), features)?;
        self.pooler
            .forward(&output.last_hidden_state)
            .map_err(|e| EmbeddingError::Inference(format!("{} pooler: {e}", self.model_type)))
    }
}

/// Vision encoder with a built-in pooler.
pub struct ImageLanguageModel {
    model_type: String,
    encoder: Box<dyn PretrainedEncoder>,
    output_dims: usize,
}

impl ImageLanguageModel {
    pub fn new(
        model_type: impl Into<String>,
        encoder: Box<dyn PretrainedEncoder>,
    ) -> Result<Self, EmbeddingError> {
        let model_type = model_type.into();
        let output_dims = dims_or_err(&model_type, encoder.config().vision_hidden_size())?;
        Ok(Self {
            model_type,
            encoder,
            output_dims,
        })
    }
}

impl LanguageModel for ImageLanguageModel {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn expected_inputs(&self) -> ExpectedInputs {
        IMAGE_INPUTS
    }

    fn output_dims(&self) -> usize {
        self.output_dims
    }

    fn device(&self) -> &Device {
        self.encoder.device()
    }

    fn forward_validated(&self, features: &FeatureBatch) -> Result<Tensor, EmbeddingError> {
        native_pooled_output(&self.model_type, self.encoder.as_ref(), features)
    }
}
