//! Candle implementations of the encoder families the registry knows about.
//!
//! Text families reuse `candle-transformers` (BERT, and the XLM-RoBERTa stack
//! for RoBERTa-shaped checkpoints such as data2vec-text). ViT is implemented
//! here: embeddings → pre-norm transformer layers → final norm → optional
//! pooler. Checkpoints saved with a task head keep the encoder under a prefix
//! (`roberta.`, `vit.`, ...), which is detected from the weights.

use std::path::Path;

use candle_core::{DType, Device, Module, Result as CandleResult, Tensor};
use candle_nn::{Activation, Conv2d, LayerNorm, Linear, VarBuilder};
use candle_transformers::models::{bert, xlm_roberta};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ExtractionParams;
use crate::encoder::{EncoderOutput, ModelConfig, ModelParams, PretrainedEncoder, SentenceEncoder};
use crate::features::{FeatureBatch, FeatureExtractor, Payload};
use crate::ops::{l2_normalize, mean_pool};
use crate::text_extractor::TokenizerFeatureExtractor;

/// Prefixes under which task-headed checkpoints store their encoder.
const ENCODER_PREFIXES: &[&str] = &["", "bert", "roberta", "xlm_roberta", "data2vec_text", "vit"];

fn msg(message: impl Into<String>) -> candle_core::Error {
    candle_core::Error::Msg(message.into())
}

fn parse_config<T: DeserializeOwned>(config: &ModelConfig) -> CandleResult<T> {
    serde_json::to_value(config)
        .and_then(serde_json::from_value)
        .map_err(|e| msg(format!("model configuration: {e}")))
}

fn feature<'a>(features: &'a FeatureBatch, name: &str) -> CandleResult<&'a Tensor> {
    features
        .get(name)
        .ok_or_else(|| msg(format!("missing input feature '{name}'")))
}

/// Returns `vb` scoped to the first prefix that holds `marker`, or `vb` itself.
fn encoder_root<'a>(vb: VarBuilder<'a>, marker: &str) -> VarBuilder<'a> {
    for prefix in ENCODER_PREFIXES {
        let scoped = if prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(prefix)
        };
        if scoped.contains_tensor(marker) {
            return scoped;
        }
    }
    vb
}

fn add_pooling_layer(params: &ModelParams) -> bool {
    params
        .get("add_pooling_layer")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

// ---------------------------------------------------------------------------
// Pooler
// ---------------------------------------------------------------------------

/// `tanh(dense(hidden[:, 0]))`, as stored under `pooler.dense`.
#[derive(Debug, Clone)]
struct TanhPooler {
    dense: Linear,
}

impl TanhPooler {
    /// Loads the checkpoint's pooler when it has one and pooling is enabled.
    fn load(vb: &VarBuilder, hidden: usize, params: &ModelParams) -> CandleResult<Option<Self>> {
        if !add_pooling_layer(params) || !vb.contains_tensor("pooler.dense.weight") {
            return Ok(None);
        }
        let dense = candle_nn::linear(hidden, hidden, vb.pp("pooler").pp("dense"))?;
        Ok(Some(Self { dense }))
    }
}

impl Module for TanhPooler {
    fn forward(&self, hidden_states: &Tensor) -> CandleResult<Tensor> {
        let first = hidden_states.narrow(1, 0, 1)?.squeeze(1)?.contiguous()?;
        self.dense.forward(&first)?.tanh()
    }
}

fn outputs(hidden: Tensor, pooler: Option<&TanhPooler>) -> CandleResult<EncoderOutput> {
    let pooler_output = pooler
        .map(|p| p.forward(&hidden)?.to_dtype(DType::F32))
        .transpose()?;
    Ok(EncoderOutput {
        last_hidden_state: hidden.to_dtype(DType::F32)?,
        pooler_output,
    })
}

// ---------------------------------------------------------------------------
// Text encoders
// ---------------------------------------------------------------------------

/// BERT checkpoints.
pub struct BertEncoder {
    model: bert::BertModel,
    pooler: Option<TanhPooler>,
    config: ModelConfig,
    device: Device,
}

impl BertEncoder {
    pub fn load(vb: VarBuilder, config: &ModelConfig, params: &ModelParams) -> CandleResult<Self> {
        let bert_config: bert::Config = parse_config(config)?;
        let hidden = config
            .text_hidden_size()
            .ok_or_else(|| msg("hidden_size missing"))?;
        let root = encoder_root(vb, "embeddings.word_embeddings.weight");
        let model = bert::BertModel::load(root.clone(), &bert_config)?;
        Ok(Self {
            model,
            pooler: TanhPooler::load(&root, hidden, params)?,
            config: config.clone(),
            device: root.device().clone(),
        })
    }
}

impl PretrainedEncoder for BertEncoder {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, features: &FeatureBatch) -> CandleResult<EncoderOutput> {
        let hidden = self.model.forward(
            feature(features, "input_ids")?,
            feature(features, "token_type_ids")?,
            Some(feature(features, "attention_mask")?),
        )?;
        outputs(hidden, self.pooler.as_ref())
    }
}

/// RoBERTa-shaped checkpoints: RoBERTa, XLM-RoBERTa and data2vec-text.
pub struct RobertaEncoder {
    model: xlm_roberta::XLMRobertaModel,
    pooler: Option<TanhPooler>,
    config: ModelConfig,
    device: Device,
}

impl RobertaEncoder {
    pub fn load(vb: VarBuilder, config: &ModelConfig, params: &ModelParams) -> CandleResult<Self> {
        let roberta_config: xlm_roberta::Config = parse_config(config)?;
        let root = encoder_root(vb, "embeddings.word_embeddings.weight");
        let model = xlm_roberta::XLMRobertaModel::new(&roberta_config, root.clone())?;
        Ok(Self {
            model,
            pooler: TanhPooler::load(&root, roberta_config.hidden_size, params)?,
            config: config.clone(),
            device: root.device().clone(),
        })
    }
}

impl PretrainedEncoder for RobertaEncoder {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, features: &FeatureBatch) -> CandleResult<EncoderOutput> {
        let hidden = self.model.forward(
            feature(features, "input_ids")?,
            feature(features, "attention_mask")?,
            feature(features, "token_type_ids")?,
            None,
            None,
            None,
        )?;
        outputs(hidden, self.pooler.as_ref())
    }
}

// ---------------------------------------------------------------------------
// ViT
// ---------------------------------------------------------------------------

fn default_hidden_act() -> Activation {
    Activation::Gelu
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_image_size() -> usize {
    224
}

fn default_patch_size() -> usize {
    16
}

fn default_num_channels() -> usize {
    3
}

fn default_qkv_bias() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct VitConfig {
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    hidden_act: Activation,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
    #[serde(default = "default_image_size")]
    image_size: usize,
    #[serde(default = "default_patch_size")]
    patch_size: usize,
    #[serde(default = "default_num_channels")]
    num_channels: usize,
    #[serde(default = "default_qkv_bias")]
    qkv_bias: bool,
}

struct VitEmbeddings {
    cls_token: Tensor,
    position_embeddings: Tensor,
    projection: Conv2d,
}

impl VitEmbeddings {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> CandleResult<Self> {
        if cfg.patch_size == 0 {
            candle_core::bail!("patch_size must be greater than 0");
        }
        let side = cfg.image_size / cfg.patch_size;
        let num_patches = side * side;
        let conv = candle_nn::Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        let projection = candle_nn::conv2d(
            cfg.num_channels,
            cfg.hidden_size,
            cfg.patch_size,
            conv,
            vb.pp("patch_embeddings").pp("projection"),
        )?;
        Ok(Self {
            cls_token: vb.get((1, 1, cfg.hidden_size), "cls_token")?,
            position_embeddings: vb
                .get((1, num_patches + 1, cfg.hidden_size), "position_embeddings")?,
            projection,
        })
    }
}

impl Module for VitEmbeddings {
    fn forward(&self, pixel_values: &Tensor) -> CandleResult<Tensor> {
        // [batch, hidden, h, w] -> [batch, patches, hidden]
        let patches = self
            .projection
            .forward(pixel_values)?
            .flatten_from(2)?
            .transpose(1, 2)?
            .contiguous()?;
        let (batch, _, hidden) = patches.dims3()?;
        let cls = self.cls_token.expand((batch, 1, hidden))?.contiguous()?;
        Tensor::cat(&[&cls, &patches], 1)?.broadcast_add(&self.position_embeddings)
    }
}

struct VitAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl VitAttention {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> CandleResult<Self> {
        if cfg.num_attention_heads == 0 || cfg.hidden_size % cfg.num_attention_heads != 0 {
            candle_core::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                cfg.hidden_size,
                cfg.num_attention_heads
            );
        }
        let h = cfg.hidden_size;
        let inner = vb.pp("attention");
        Ok(Self {
            query: candle_nn::linear_b(h, h, cfg.qkv_bias, inner.pp("query"))?,
            key: candle_nn::linear_b(h, h, cfg.qkv_bias, inner.pp("key"))?,
            value: candle_nn::linear_b(h, h, cfg.qkv_bias, inner.pp("value"))?,
            output: candle_nn::linear(h, h, vb.pp("output").pp("dense"))?,
            n_heads: cfg.num_attention_heads,
            head_dim: h / cfg.num_attention_heads,
        })
    }
}

impl Module for VitAttention {
    fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        let (b_sz, seq_len, hidden) = x.dims3()?;
        let heads = |t: Tensor| {
            t.reshape((b_sz, seq_len, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = heads(self.query.forward(x)?)?;
        let k = heads(self.key.forward(x)?)?;
        let v = heads(self.value.forward(x)?)?;

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let weights = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let weights = candle_nn::ops::softmax_last_dim(&weights)?;
        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b_sz, seq_len, hidden))?;
        self.output.forward(&out)
    }
}

struct VitLayer {
    layernorm_before: LayerNorm,
    attention: VitAttention,
    layernorm_after: LayerNorm,
    intermediate: Linear,
    activation: Activation,
    output: Linear,
}

impl VitLayer {
    fn load(cfg: &VitConfig, vb: VarBuilder) -> CandleResult<Self> {
        let (h, eps) = (cfg.hidden_size, cfg.layer_norm_eps);
        Ok(Self {
            layernorm_before: candle_nn::layer_norm(h, eps, vb.pp("layernorm_before"))?,
            attention: VitAttention::load(cfg, vb.pp("attention"))?,
            layernorm_after: candle_nn::layer_norm(h, eps, vb.pp("layernorm_after"))?,
            intermediate: candle_nn::linear(
                h,
                cfg.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            activation: cfg.hidden_act,
            output: candle_nn::linear(cfg.intermediate_size, h, vb.pp("output").pp("dense"))?,
        })
    }
}

impl Module for VitLayer {
    fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        let attended = self.attention.forward(&self.layernorm_before.forward(x)?)?;
        let x = (x + attended)?;
        let mlp = self
            .layernorm_after
            .forward(&x)?
            .apply(&self.intermediate)?
            .apply(&self.activation)?
            .apply(&self.output)?;
        x + mlp
    }
}

/// ViT checkpoints (`ViTModel` layout).
///
/// `bool_masked_pos` and `head_mask` are accepted by the wrapper but have no
/// effect at inference.
pub struct VitEncoder {
    embeddings: VitEmbeddings,
    layers: Vec<VitLayer>,
    layernorm: LayerNorm,
    pooler: Option<TanhPooler>,
    dtype: DType,
    config: ModelConfig,
    device: Device,
}

impl VitEncoder {
    pub fn load(vb: VarBuilder, config: &ModelConfig, params: &ModelParams) -> CandleResult<Self> {
        let cfg: VitConfig = parse_config(config)?;
        let root = encoder_root(vb, "embeddings.cls_token");
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| VitLayer::load(&cfg, root.pp("encoder").pp(format!("layer.{i}"))))
            .collect::<CandleResult<Vec<_>>>()?;
        Ok(Self {
            embeddings: VitEmbeddings::load(&cfg, root.pp("embeddings"))?,
            layers,
            layernorm: candle_nn::layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                root.pp("layernorm"),
            )?,
            pooler: TanhPooler::load(&root, cfg.hidden_size, params)?,
            dtype: root.dtype(),
            config: config.clone(),
            device: root.device().clone(),
        })
    }
}

impl PretrainedEncoder for VitEncoder {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&self, features: &FeatureBatch) -> CandleResult<EncoderOutput> {
        let pixels = feature(features, "pixel_values")?.to_dtype(self.dtype)?;
        let mut hidden = self.embeddings.forward(&pixels)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }
        let hidden = self.layernorm.forward(&hidden)?;
        outputs(hidden, self.pooler.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn build_bert(
    vb: VarBuilder<'_>,
    config: &ModelConfig,
    params: &ModelParams,
) -> CandleResult<Box<dyn PretrainedEncoder>> {
    Ok(Box::new(BertEncoder::load(vb, config, params)?))
}

pub fn build_roberta(
    vb: VarBuilder<'_>,
    config: &ModelConfig,
    params: &ModelParams,
) -> CandleResult<Box<dyn PretrainedEncoder>> {
    Ok(Box::new(RobertaEncoder::load(vb, config, params)?))
}

pub fn build_vit(
    vb: VarBuilder<'_>,
    config: &ModelConfig,
    params: &ModelParams,
) -> CandleResult<Box<dyn PretrainedEncoder>> {
    Ok(Box::new(VitEncoder::load(vb, config, params)?))
}

// ---------------------------------------------------------------------------
// Sentence encoder
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SentenceBertConfig {
    max_seq_length: usize,
}

#[derive(Debug, Deserialize)]
struct SentenceModule {
    #[serde(rename = "type")]
    kind: String,
}

/// BERT-based sentence-transformers checkpoint: encoder → masked mean pooling,
/// L2-normalized when the pipeline declares a `Normalize` module.
pub struct BertSentenceEncoder {
    model: bert::BertModel,
    tokenizer: TokenizerFeatureExtractor,
    params: ExtractionParams,
    normalize: bool,
    dims: usize,
    device: Device,
}

impl BertSentenceEncoder {
    /// Loads `config.json`, `model.safetensors` and `tokenizer.json` from `dir`.
    ///
    /// `sentence_bert_config.json` sets the truncation length and `modules.json`
    /// enables normalization; both are optional.
    pub fn load(dir: &Path, device: &Device) -> CandleResult<Self> {
        let read = |name: &str| {
            std::fs::read_to_string(dir.join(name))
                .map_err(|e| msg(format!("reading {}: {e}", dir.join(name).display())))
        };
        let config: bert::Config = serde_json::from_str(&read("config.json")?)
            .map_err(|e| msg(format!("parsing config.json: {e}")))?;
        let raw: ModelConfig = serde_json::from_str(&read("config.json")?)
            .map_err(|e| msg(format!("parsing config.json: {e}")))?;
        let dims = raw
            .text_hidden_size()
            .ok_or_else(|| msg("hidden_size missing"))?;

        let max_length = read("sentence_bert_config.json")
            .ok()
            .and_then(|raw| serde_json::from_str::<SentenceBertConfig>(&raw).ok())
            .map_or(ExtractionParams::default().max_length, |c| c.max_seq_length);
        let normalize = read("modules.json")
            .ok()
            .and_then(|raw| serde_json::from_str::<Vec<SentenceModule>>(&raw).ok())
            .is_some_and(|modules| modules.iter().any(|m| m.kind.ends_with("Normalize")));

        let tokenizer = TokenizerFeatureExtractor::from_file(&dir.join("tokenizer.json"))
            .map_err(|e| msg(e.to_string()))?;
        let weights = dir.join("model.safetensors");
        // SAFETY: the weights file is memory-mapped read-only and must not be
        // modified while loaded.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], DType::F32, device)? };
        let model = bert::BertModel::load(vb, &config)?;
        tracing::debug!(
            dir = %dir.display(),
            dims,
            max_length,
            normalize,
            "sentence encoder loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            params: ExtractionParams::with_max_length(max_length),
            normalize,
            dims,
            device: device.clone(),
        })
    }
}

impl SentenceEncoder for BertSentenceEncoder {
    fn output_dims(&self) -> usize {
        self.dims
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn encode(&self, data: &[Payload]) -> CandleResult<Tensor> {
        let features = self
            .tokenizer
            .extract(data, &self.params)
            .and_then(|f| f.to_device(&self.device))
            .map_err(|e| msg(e.to_string()))?;
        let mask = feature(&features, "attention_mask")?;
        let hidden = self.model.forward(
            feature(&features, "input_ids")?,
            feature(&features, "token_type_ids")?,
            Some(mask),
        )?;
        let pooled = mean_pool(&hidden, mask)?;
        let pooled = if self.normalize {
            l2_normalize(&pooled)?
        } else {
            pooled
        };
        pooled.to_dtype(DType::F32)?.to_device(&Device::Cpu)
    }
}

pub fn load_bert_sentence_encoder(
    dir: &Path,
    device: &Device,
) -> CandleResult<Box<dyn SentenceEncoder>> {
    Ok(Box::new(BertSentenceEncoder::load(dir, device)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn text_config(model_type: &str) -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "model_type": model_type,
            "vocab_size": 16,
            "hidden_size": 8,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.1,
            "attention_probs_dropout_prob": 0.1,
            "max_position_embeddings": 32,
            "type_vocab_size": 1,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 1,
            "position_embedding_type": "absolute"
        }))
        .unwrap()
    }

    fn vit_config() -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "model_type": "vit",
            "hidden_size": 8,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "image_size": 4,
            "patch_size": 2,
            "num_channels": 3
        }))
        .unwrap()
    }

    fn text_features(rows: usize, seq: usize) -> FeatureBatch {
        let ids = Tensor::full(2u32, (rows, seq), &Device::Cpu).unwrap();
        let types = Tensor::zeros((rows, seq), DType::U32, &Device::Cpu).unwrap();
        let mask = Tensor::ones((rows, seq), DType::U32, &Device::Cpu).unwrap();
        FeatureBatch::new()
            .with("input_ids", ids)
            .with("token_type_ids", types)
            .with("attention_mask", mask)
    }

    fn pixels(rows: usize, side: usize) -> FeatureBatch {
        let values = Tensor::zeros((rows, 3, side, side), DType::F32, &Device::Cpu).unwrap();
        FeatureBatch::new().with("pixel_values", values)
    }

    fn zeros() -> VarBuilder<'static> {
        VarBuilder::zeros(DType::F32, &Device::Cpu)
    }

    // === Text encoders ===

    #[test]
    fn bert_produces_hidden_states_and_pooled_output() {
        let encoder =
            BertEncoder::load(zeros(), &text_config("bert"), &ModelParams::new()).unwrap();
        let output = encoder.forward(&text_features(2, 5)).unwrap();
        assert_eq!(output.last_hidden_state.dims(), &[2, 5, 8]);
        assert_eq!(output.pooler_output.unwrap().dims(), &[2, 8]);
    }

    #[test]
    fn pooler_can_be_disabled() {
        let params = ModelParams::from_iter([(
            "add_pooling_layer".to_owned(),
            serde_json::Value::Bool(false),
        )]);
        let encoder = BertEncoder::load(zeros(), &text_config("bert"), &params).unwrap();
        assert!(encoder.forward(&text_features(1, 3)).unwrap().pooler_output.is_none());
    }

    #[test]
    fn roberta_family_runs_on_data2vec_config() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let encoder =
            RobertaEncoder::load(vb, &text_config("data2vec-text"), &ModelParams::new()).unwrap();
        let output = encoder.forward(&text_features(3, 4)).unwrap();
        assert_eq!(output.last_hidden_state.dims(), &[3, 4, 8]);
        // Fresh weights carry no pooler.
        assert!(output.pooler_output.is_none());
        assert_eq!(encoder.config().model_type, "data2vec-text");
    }

    #[test]
    fn missing_text_input_is_an_error() {
        let encoder =
            BertEncoder::load(zeros(), &text_config("bert"), &ModelParams::new()).unwrap();
        let features = FeatureBatch::new()
            .with("input_ids", Tensor::ones((1, 2), DType::U32, &Device::Cpu).unwrap());
        let err = encoder.forward(&features).err().unwrap();
        assert!(err.to_string().contains("token_type_ids"));
    }

    #[test]
    fn incomplete_config_fails_to_load() {
        let config = ModelConfig {
            model_type: "roberta".into(),
            hidden_size: Some(8),
            ..ModelConfig::default()
        };
        assert!(RobertaEncoder::load(zeros(), &config, &ModelParams::new()).is_err());
    }

    // === ViT ===

    #[test]
    fn vit_embeds_patches_plus_cls_token() {
        let encoder = VitEncoder::load(zeros(), &vit_config(), &ModelParams::new()).unwrap();
        let output = encoder.forward(&pixels(2, 4)).unwrap();
        // (4 / 2)^2 patches + cls
        assert_eq!(output.last_hidden_state.dims(), &[2, 5, 8]);
        assert_eq!(output.pooler_output.unwrap().dims(), &[2, 8]);
    }

    #[test]
    fn vit_rejects_images_of_another_size() {
        let encoder = VitEncoder::load(zeros(), &vit_config(), &ModelParams::new()).unwrap();
        assert!(encoder.forward(&pixels(1, 6)).is_err());
    }

    #[test]
    fn vit_layer_count_follows_config() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        VitEncoder::load(vb, &vit_config(), &ModelParams::new()).unwrap();
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n.starts_with("encoder.layer.1.")));
        assert!(!names.iter().any(|n| n.starts_with("encoder.layer.2.")));
    }

    // === Helpers ===

    #[test]
    fn encoder_root_finds_prefixed_weights() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let marker = "embeddings.word_embeddings.weight";
        vb.pp("roberta")
            .get_with_hints((2, 2), marker, candle_nn::Init::Const(0.))
            .unwrap();
        let root = encoder_root(vb, marker);
        assert!(root.contains_tensor(marker));
        assert_eq!(root.prefix(), "roberta");
    }

    #[test]
    fn pooling_layer_defaults_to_enabled() {
        assert!(add_pooling_layer(&ModelParams::new()));
        let params =
            ModelParams::from_iter([("add_pooling_layer".to_owned(), serde_json::json!(false))]);
        assert!(!add_pooling_layer(&params));
    }
}
