//! Loading checkpoints, sentence encoders and feature extractors by identifier.
//!
//! [`ModelLoader`] is the seam between the embedder and wherever model files
//! live. [`LocalModelLoader`] resolves identifiers against directories on disk
//! laid out the way hub snapshots are:
//!
//! ```text
//! <root>/<model>/config.json
//! <root>/<model>/model.safetensors
//! <root>/<model>/tokenizer.json
//! <root>/<model>/preprocessor_config.json
//! ```
//!
//! Candle ships no architecture-generic model, so encoder builders are
//! registered per architecture key. [`LocalModelLoader::with_default_encoders`]
//! registers the built-in BERT, RoBERTa-family and ViT encoders plus the BERT
//! sentence-transformers pipeline; callers may add or override keys.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use mosaic_core::ContentType;
use serde::{Deserialize, Serialize};

use crate::encoder::{ModelConfig, ModelParams, PretrainedEncoder, SentenceEncoder};
use crate::error::EmbeddingError;
use crate::features::FeatureExtractor;
use crate::image_extractor::ImageFeatureExtractor;
use crate::pretrained;
use crate::text_extractor::TokenizerFeatureExtractor;

/// Access settings forwarded to every load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub auth_token: Option<String>,
    pub revision: Option<String>,
}

/// Source of pretrained models and their preprocessing.
pub trait ModelLoader: Send + Sync {
    /// Reads the checkpoint configuration used to detect the architecture.
    fn load_config(&self, model: &str, options: &LoadOptions)
    -> Result<ModelConfig, EmbeddingError>;

    /// Loads `model` as `architecture` onto `device`.
    fn load_encoder(
        &self,
        model: &str,
        architecture: &str,
        params: &ModelParams,
        options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn PretrainedEncoder>, EmbeddingError>;

    /// Loads a self-contained sentence encoder onto `device`.
    fn load_sentence_encoder(
        &self,
        model: &str,
        content_type: ContentType,
        options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn SentenceEncoder>, EmbeddingError>;

    /// Loads the preprocessing that matches `model` for `content_type` data.
    fn load_feature_extractor(
        &self,
        model: &str,
        content_type: ContentType,
        options: &LoadOptions,
    ) -> Result<Box<dyn FeatureExtractor>, EmbeddingError>;
}

/// Builds an encoder from mapped weights.
pub type EncoderBuilder = Arc<
    dyn Fn(
            VarBuilder<'_>,
            &ModelConfig,
            &ModelParams,
        ) -> candle_core::Result<Box<dyn PretrainedEncoder>>
        + Send
        + Sync,
>;

/// Builds a sentence encoder from its model directory.
pub type SentenceEncoderBuilder =
    Arc<dyn Fn(&Path, &Device) -> candle_core::Result<Box<dyn SentenceEncoder>> + Send + Sync>;

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";
const PREPROCESSOR_FILE: &str = "preprocessor_config.json";

/// Loads models from local directories.
#[derive(Clone)]
pub struct LocalModelLoader {
    root: PathBuf,
    dtype: DType,
    encoders: HashMap<String, EncoderBuilder>,
    sentence_encoder: Option<SentenceEncoderBuilder>,
}

impl fmt::Debug for LocalModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut architectures: Vec<&str> = self.encoders.keys().map(String::as_str).collect();
        architectures.sort_unstable();
        f.debug_struct("LocalModelLoader")
            .field("root", &self.root)
            .field("dtype", &self.dtype)
            .field("architectures", &architectures)
            .field("sentence_encoder", &self.sentence_encoder.is_some())
            .finish()
    }
}

impl LocalModelLoader {
    /// Creates a loader resolving relative identifiers under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dtype: DType::F32,
            encoders: HashMap::new(),
            sentence_encoder: None,
        }
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Registers how to build encoders for one architecture key.
    #[must_use]
    pub fn with_encoder<F>(mut self, architecture: impl Into<String>, builder: F) -> Self
    where
        F: Fn(
                VarBuilder<'_>,
                &ModelConfig,
                &ModelParams,
            ) -> candle_core::Result<Box<dyn PretrainedEncoder>>
            + Send
            + Sync
            + 'static,
    {
        self.encoders.insert(architecture.into(), Arc::new(builder));
        self
    }

    /// Registers the encoders this crate implements.
    #[must_use]
    pub fn with_default_encoders(self) -> Self {
        self.with_encoder("AutoModel", pretrained::build_bert)
            .with_encoder("BertModel", pretrained::build_bert)
            .with_encoder("RobertaModel", pretrained::build_roberta)
            .with_encoder("XLMRobertaModel", pretrained::build_roberta)
            .with_encoder("Data2VecTextForQuestionAnswering", pretrained::build_roberta)
            .with_encoder("ViTModel", pretrained::build_vit)
            .with_sentence_encoder(pretrained::load_bert_sentence_encoder)
    }

    /// Registers how to build sentence encoders.
    #[must_use]
    pub fn with_sentence_encoder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&Path, &Device) -> candle_core::Result<Box<dyn SentenceEncoder>>
            + Send
            + Sync
            + 'static,
    {
        self.sentence_encoder = Some(Arc::new(builder));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a model identifier to its directory.
    ///
    /// Existing paths are used as given, anything else is looked up under the
    /// root. A revision selects a same-named subdirectory when one exists.
    pub fn model_dir(&self, model: &str, options: &LoadOptions) -> Result<PathBuf, EmbeddingError> {
        let direct = PathBuf::from(model);
        let dir = if direct.is_dir() {
            direct
        } else {
            self.root.join(model)
        };
        if !dir.is_dir() {
            return Err(EmbeddingError::ModelLoad(format!(
                "model directory not found for '{model}': {}",
                dir.display()
            )));
        }
        if options.auth_token.is_some() {
            tracing::debug!(model, "auth token ignored for local model");
        }
        match &options.revision {
            Some(revision) if dir.join(revision).is_dir() => Ok(dir.join(revision)),
            Some(revision) => {
                tracing::debug!(model, revision, "revision directory absent, using model root");
                Ok(dir)
            }
            None => Ok(dir),
        }
    }

    fn required_file(dir: &Path, name: &str) -> Result<PathBuf, EmbeddingError> {
        let path = dir.join(name);
        if path.exists() {
            Ok(path)
        } else {
            Err(EmbeddingError::ModelLoad(format!(
                "required model file missing: {}",
                path.display()
            )))
        }
    }
}

impl ModelLoader for LocalModelLoader {
    fn load_config(
        &self,
        model: &str,
        options: &LoadOptions,
    ) -> Result<ModelConfig, EmbeddingError> {
        let dir = self.model_dir(model, options)?;
        let path = Self::required_file(&dir, CONFIG_FILE)?;
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EmbeddingError::ModelLoad(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| EmbeddingError::ModelLoad(format!("parsing {}: {e}", path.display())))
    }

    fn load_encoder(
        &self,
        model: &str,
        architecture: &str,
        params: &ModelParams,
        options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn PretrainedEncoder>, EmbeddingError> {
        let builder = self.encoders.get(architecture).ok_or_else(|| {
            EmbeddingError::ModelLoad(format!(
                "no encoder builder registered for architecture {architecture} (model '{model}')"
            ))
        })?;
        let config = self.load_config(model, options)?;
        let dir = self.model_dir(model, options)?;
        let weights = Self::required_file(&dir, WEIGHTS_FILE)?;

        tracing::info!(model, architecture, weights = %weights.display(), "mapping safetensors");
        // SAFETY: the weights file is memory-mapped read-only and must not be
        // modified while loaded.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&weights], self.dtype, device).map_err(|e| {
                EmbeddingError::ModelLoad(format!("loading {}: {e}", weights.display()))
            })?
        };
        builder(vb, &config, params)
            .map_err(|e| {
                EmbeddingError::ModelLoad(format!("building {architecture} from '{model}': {e}"))
            })
    }

    fn load_sentence_encoder(
        &self,
        model: &str,
        content_type: ContentType,
        options: &LoadOptions,
        device: &Device,
    ) -> Result<Box<dyn SentenceEncoder>, EmbeddingError> {
        let builder = self.sentence_encoder.as_ref().ok_or_else(|| {
            EmbeddingError::ModelLoad(format!(
                "no sentence encoder builder registered, cannot load '{model}' for {content_type}"
            ))
        })?;
        let dir = self.model_dir(model, options)?;
        builder(&dir, device)
            .map_err(|e| {
                EmbeddingError::ModelLoad(format!("building sentence encoder '{model}': {e}"))
            })
    }

    fn load_feature_extractor(
        &self,
        model: &str,
        content_type: ContentType,
        options: &LoadOptions,
    ) -> Result<Box<dyn FeatureExtractor>, EmbeddingError> {
        let dir = self.model_dir(model, options)?;
        match content_type {
            ContentType::Text | ContentType::Table => {
                let path = Self::required_file(&dir, TOKENIZER_FILE)?;
                Ok(Box::new(TokenizerFeatureExtractor::from_file(&path)?))
            }
            ContentType::Image => {
                let path = Self::required_file(&dir, PREPROCESSOR_FILE)?;
                Ok(Box::new(ImageFeatureExtractor::from_file(&path)?))
            }
        }
    }
}
