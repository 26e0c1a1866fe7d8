//! Resolution of checkpoints to language model wrappers.
//!
//! A checkpoint's declared `model_type` is normalized through an alias table
//! to a canonical architecture key, which selects a wrapper constructor and
//! the construction defaults for that family. All tables are immutable.

use std::collections::HashMap;
use std::sync::LazyLock;

use candle_core::Device;

use crate::encoder::{ModelParams, PretrainedEncoder};
use crate::error::EmbeddingError;
use crate::language_model::{
    ImageLanguageModel, LanguageModel, TextLanguageModel, TextLanguageModelPlusPooler,
};
use crate::loader::{LoadOptions, ModelLoader};

/// Builds a wrapper around a loaded encoder.
pub type WrapperConstructor =
    fn(&str, Box<dyn PretrainedEncoder>) -> Result<Box<dyn LanguageModel>, EmbeddingError>;

/// Architecture used when a checkpoint's family is not recognized.
pub const GENERIC_ARCHITECTURE: &str = "AutoModel";

fn text(
    model_type: &str,
    encoder: Box<dyn PretrainedEncoder>,
) -> Result<Box<dyn LanguageModel>, EmbeddingError> {
    Ok(Box::new(TextLanguageModel::new(model_type, encoder)?))
}

fn text_plus_pooler(
    model_type: &str,
    encoder: Box<dyn PretrainedEncoder>,
) -> Result<Box<dyn LanguageModel>, EmbeddingError> {
    Ok(Box::new(TextLanguageModelPlusPooler::new(model_type, encoder)?))
}

fn image(
    model_type: &str,
    encoder: Box<dyn PretrainedEncoder>,
) -> Result<Box<dyn LanguageModel>, EmbeddingError> {
    Ok(Box::new(ImageLanguageModel::new(model_type, encoder)?))
}

/// Canonical architecture key → wrapper constructor.
pub const WRAPPERS: &[(&str, WrapperConstructor)] = &[
    (GENERIC_ARCHITECTURE, text),
    ("BertModel", text),
    ("RobertaModel", text),
    ("XLMRobertaModel", text),
    ("Data2VecTextForQuestionAnswering", text_plus_pooler),
    ("Data2VecVisionForImageClassification", image),
    ("ViTModel", image),
];

/// Lowercase `model_type` → canonical architecture key.
///
/// Registry keys also resolve case-insensitively from their own name.
const ALIASES: &[(&str, &str)] = &[
    ("data2vec-text", "Data2VecTextForQuestionAnswering"),
    ("data2vec-vision", "Data2VecVisionForImageClassification"),
    ("bert", "BertModel"),
    ("roberta", "RobertaModel"),
    ("xlm-roberta", "XLMRobertaModel"),
    ("vit", "ViTModel"),
];

/// Construction parameters applied before user overrides.
static DEFAULT_MODEL_PARAMS: LazyLock<HashMap<&'static str, ModelParams>> = LazyLock::new(|| {
    let mut defaults = HashMap::new();
    // The classification head disables the pooler by default, but the pooled
    // output is what gets embedded.
    defaults.insert(
        "Data2VecVisionForImageClassification",
        ModelParams::from_iter([("add_pooling_layer".to_owned(), serde_json::Value::Bool(true))]),
    );
    defaults
});

/// Every registered architecture key.
pub fn supported_architectures() -> Vec<&'static str> {
    WRAPPERS.iter().map(|(key, _)| *key).collect()
}

/// Maps a declared `model_type` to its canonical architecture key.
///
/// Unknown families resolve to [`GENERIC_ARCHITECTURE`] with a warning. The
/// generic wrapper assumes a text encoder with a native pooler, so this path
/// can fail at inference time for checkpoints that do not match.
pub fn canonical_architecture(model_type: &str) -> &'static str {
    let lowered = model_type.to_lowercase();
    let alias = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, key)| *key);
    let registered = || {
        WRAPPERS
            .iter()
            .find(|(key, _)| key.to_lowercase() == lowered)
            .map(|(key, _)| *key)
    };
    alias.or_else(registered).unwrap_or_else(|| {
        tracing::warn!(
            model_type,
            fallback = GENERIC_ARCHITECTURE,
            "architecture not recognized, using the generic wrapper; this can crash at inference"
        );
        GENERIC_ARCHITECTURE
    })
}

/// Looks up the wrapper constructor registered for `architecture`.
pub fn wrapper_for(model: &str, architecture: &str) -> Result<WrapperConstructor, EmbeddingError> {
    WRAPPERS
        .iter()
        .find(|(key, _)| *key == architecture)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| EmbeddingError::UnsupportedArchitecture {
            model: model.to_owned(),
            detected: architecture.to_owned(),
            supported: supported_architectures().into_iter().map(str::to_owned).collect(),
        })
}

/// Architecture defaults overlaid with `overrides`; overrides win on key collision.
pub fn model_params(architecture: &str, overrides: &ModelParams) -> ModelParams {
    let mut params = DEFAULT_MODEL_PARAMS
        .get(architecture)
        .cloned()
        .unwrap_or_default();
    for (key, value) in overrides {
        params.insert(key.clone(), value.clone());
    }
    params
}

/// Resolves `model`'s architecture from its configuration and loads it behind a wrapper.
pub fn load_language_model(
    loader: &dyn ModelLoader,
    model: &str,
    options: &LoadOptions,
    overrides: &ModelParams,
    device: &Device,
) -> Result<Box<dyn LanguageModel>, EmbeddingError> {
    if model.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput(format!(
            "'{model}' is not a valid model name or path"
        )));
    }

    let config = loader.load_config(model, options)?;
    if config.model_type.is_empty() {
        tracing::warn!(
            model,
            "model type not declared in the checkpoint configuration; using the generic wrapper, this can crash"
        );
    }
    let architecture = canonical_architecture(&config.model_type);
    build_language_model(loader, model, architecture, options, overrides, device)
}

/// Loads `model` as the given architecture, bypassing configuration introspection.
pub fn build_language_model(
    loader: &dyn ModelLoader,
    model: &str,
    architecture: &str,
    options: &LoadOptions,
    overrides: &ModelParams,
    device: &Device,
) -> Result<Box<dyn LanguageModel>, EmbeddingError> {
    let constructor = wrapper_for(model, architecture)?;
    let params = model_params(architecture, overrides);

    tracing::info!(model, architecture, ?device, "loading model");
    let encoder = loader.load_encoder(model, architecture, &params, options, device)?;
    constructor(architecture, encoder)
}
