//! The multimodal embedder: one model per content type, one aligned matrix out.

use std::collections::BTreeMap;
use std::fmt;

use candle_core::{D, DType, Device, Tensor};
use mosaic_core::{ContentType, Document};

use crate::config::{EmbedderConfig, ExtractionParams};
use crate::convert::{DataGroup, docs_to_data, validate_content_types};
use crate::device::resolve_devices;
use crate::encoder::SentenceEncoder;
use crate::error::EmbeddingError;
use crate::features::{FeatureExtractor, get_features};
use crate::language_model::LanguageModel;
use crate::loader::ModelLoader;
use crate::parallel::DataParallel;
use crate::registry::load_language_model;

/// Identifiers in this namespace are self-contained sentence encoders.
pub const SENTENCE_ENCODER_NAMESPACE: &str = "sentence-transformers/";

/// Returns `true` if `model` handles its own preprocessing.
pub fn is_sentence_encoder(model: &str) -> bool {
    model.starts_with(SENTENCE_ENCODER_NAMESPACE)
}

/// The model serving one content type.
pub enum Encoder {
    /// Consumes converted payloads directly.
    Sentence(Box<dyn SentenceEncoder>),
    /// Needs its paired feature extractor to produce named tensors first.
    Language {
        model: Box<dyn LanguageModel>,
        extractor: Box<dyn FeatureExtractor>,
    },
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sentence(encoder) => f
                .debug_struct("Sentence")
                .field("output_dims", &encoder.output_dims())
                .finish_non_exhaustive(),
            Self::Language { model, .. } => f
                .debug_struct("Language")
                .field("model_type", &model.model_type())
                .field("output_dims", &model.output_dims())
                .finish_non_exhaustive(),
        }
    }
}

impl Encoder {
    pub fn output_dims(&self) -> usize {
        match self {
            Self::Sentence(encoder) => encoder.output_dims(),
            Self::Language { model, .. } => model.output_dims(),
        }
    }

    pub fn device(&self) -> &Device {
        match self {
            Self::Sentence(encoder) => encoder.device(),
            Self::Language { model, .. } => model.device(),
        }
    }

    /// Embeds one content type's payloads into `[rows, output_dims]` on the CPU.
    fn embed_group(
        &self,
        group: &DataGroup,
        params: &ExtractionParams,
    ) -> Result<Tensor, EmbeddingError> {
        let content_type = group.content_type;
        let output = match self {
            Self::Sentence(encoder) => encoder.encode(&group.payloads).map_err(|e| {
                EmbeddingError::Inference(format!("{content_type} sentence encoder: {e}"))
            })?,
            Self::Language { model, extractor } => {
                let features =
                    get_features(&group.payloads, content_type, extractor.as_ref(), params)?;
                if features.is_empty() {
                    return Err(EmbeddingError::EmptyFeatures(content_type));
                }
                let features = features.to_device(model.device())?;
                model.forward(&features)?
            }
        };

        let rows = output
            .dim(0)
            .map_err(|e| EmbeddingError::Inference(format!("{content_type} output: {e}")))?;
        if rows != group.payloads.len() {
            return Err(EmbeddingError::Inference(format!(
                "{content_type} model returned {rows} rows for {} inputs",
                group.payloads.len()
            )));
        }
        output
            .to_device(&Device::Cpu)
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(|e| EmbeddingError::Device(format!("collecting {content_type} output: {e}")))
    }
}

/// Embeds heterogeneous documents into one matrix whose row `i` belongs to document `i`.
///
/// Construction loads every model once; `embed` only reads them.
pub struct MultiModalEmbedder {
    models: BTreeMap<ContentType, Encoder>,
    model_names: BTreeMap<ContentType, String>,
    extraction_params: BTreeMap<ContentType, ExtractionParams>,
    batch_size: usize,
    embed_meta: bool,
    devices: Vec<Device>,
}

impl fmt::Debug for MultiModalEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiModalEmbedder")
            .field("models", &self.model_names)
            .field("batch_size", &self.batch_size)
            .field("embed_meta", &self.embed_meta)
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

impl MultiModalEmbedder {
    /// Loads one model (and extractor, where needed) per configured content type.
    pub fn new(config: &EmbedderConfig, loader: &dyn ModelLoader) -> Result<Self, EmbeddingError> {
        validate_config(config)?;
        let devices = resolve_devices(config.devices.as_deref())?;
        if devices.len() > 1 && config.batch_size < devices.len() {
            tracing::warn!(
                batch_size = config.batch_size,
                devices = devices.len(),
                "batch size is smaller than the device count, some devices will stay idle"
            );
        }

        let options = config.load_options();
        let mut models = BTreeMap::new();
        for (&content_type, model) in &config.embedding_models {
            let encoder = if is_sentence_encoder(model) {
                // Sentence encoders are never replicated.
                let encoder =
                    loader.load_sentence_encoder(model, content_type, &options, &devices[0])?;
                Encoder::Sentence(encoder)
            } else {
                let extractor = loader.load_feature_extractor(model, content_type, &options)?;
                let params = config.model_params(content_type);
                let model = if devices.len() > 1 {
                    let replicas = devices
                        .iter()
                        .map(|device| load_language_model(loader, model, &options, &params, device))
                        .collect::<Result<Vec<_>, _>>()?;
                    Box::new(DataParallel::new(replicas)?) as Box<dyn LanguageModel>
                } else {
                    load_language_model(loader, model, &options, &params, &devices[0])?
                };
                Encoder::Language { model, extractor }
            };
            tracing::info!(
                %content_type,
                model = %model,
                output_dims = encoder.output_dims(),
                devices = devices.len(),
                "embedding model ready"
            );
            models.insert(content_type, encoder);
        }

        Ok(Self::assemble(config, models, devices))
    }

    /// Builds an embedder around already loaded encoders.
    ///
    /// Model identifiers are taken from `config` for diagnostics only.
    pub fn from_encoders(
        config: &EmbedderConfig,
        encoders: impl IntoIterator<Item = (ContentType, Encoder)>,
    ) -> Result<Self, EmbeddingError> {
        if config.batch_size == 0 {
            return Err(EmbeddingError::InvalidInput("batch_size must be greater than 0".into()));
        }
        let models: BTreeMap<ContentType, Encoder> = encoders.into_iter().collect();
        if models.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "at least one embedding model is required".into(),
            ));
        }
        let mut devices: Vec<Device> = Vec::new();
        for encoder in models.values() {
            if !devices.iter().any(|d| d.same_device(encoder.device())) {
                devices.push(encoder.device().clone());
            }
        }
        Ok(Self::assemble(config, models, devices))
    }

    fn assemble(
        config: &EmbedderConfig,
        models: BTreeMap<ContentType, Encoder>,
        devices: Vec<Device>,
    ) -> Self {
        let model_names = models
            .keys()
            .map(|ct| {
                let name = config.embedding_models.get(ct).cloned().unwrap_or_default();
                (*ct, name)
            })
            .collect();
        let extraction_params = ContentType::ALL
            .iter()
            .map(|&ct| (ct, config.extraction_params(ct)))
            .collect();
        Self {
            models,
            model_names,
            extraction_params,
            batch_size: config.batch_size,
            embed_meta: config.embeds_meta(),
            devices,
        }
    }

    /// Embeds `documents` into a `[documents.len(), output_dims]` matrix on the CPU.
    ///
    /// Documents are processed in batches of `batch_size` (the configured
    /// default when `None`). The whole call fails if any document has an
    /// unsupported content type, if no model serves a present content type,
    /// or if models disagree on their output width, within one batch or
    /// across batches.
    pub fn embed(
        &self,
        documents: &[Document],
        batch_size: Option<usize>,
    ) -> Result<Tensor, EmbeddingError> {
        let batch_size = batch_size.unwrap_or(self.batch_size);
        if batch_size == 0 {
            return Err(EmbeddingError::InvalidInput("batch_size must be greater than 0".into()));
        }
        validate_content_types(documents)?;
        for document in documents {
            let content_type = document.parsed_content_type()?;
            if !self.models.contains_key(&content_type) {
                return Err(self.missing_model(content_type));
            }
        }
        if documents.is_empty() {
            return Tensor::from_vec(Vec::<f32>::new(), (0, 0), &Device::Cpu)
                .map_err(|e| EmbeddingError::Inference(e.to_string()));
        }

        let mut blocks = Vec::new();
        let mut sizes: Vec<(ContentType, usize)> = Vec::new();
        for (index, batch) in documents.chunks(batch_size).enumerate() {
            tracing::debug!(batch = index, rows = batch.len(), "embedding batch");
            let (block, batch_sizes) = self.embed_batch(batch)?;
            for size in batch_sizes {
                if !sizes.iter().any(|(ty, _)| *ty == size.0) {
                    sizes.push(size);
                }
            }
            if sizes.windows(2).any(|pair| pair[0].1 != pair[1].1) {
                return Err(EmbeddingError::DimensionMismatch { sizes });
            }
            blocks.push(block);
        }
        Tensor::cat(&blocks, 0)
            .map_err(|e| EmbeddingError::Inference(format!("concatenating batches: {e}")))
    }

    /// Embeds one batch, returning its rows and the output width of each content type in it.
    fn embed_batch(
        &self,
        documents: &[Document],
    ) -> Result<(Tensor, Vec<(ContentType, usize)>), EmbeddingError> {
        let groups = docs_to_data(documents, self.embed_meta)?;

        let mut outputs = Vec::with_capacity(groups.len());
        for group in &groups {
            let encoder = self
                .models
                .get(&group.content_type)
                .ok_or_else(|| self.missing_model(group.content_type))?;
            let params = self
                .extraction_params
                .get(&group.content_type)
                .cloned()
                .unwrap_or_default();
            outputs.push(encoder.embed_group(group, &params)?);
        }

        let sizes = groups
            .iter()
            .zip(&outputs)
            .map(|(group, output)| {
                output
                    .dim(D::Minus1)
                    .map(|dims| (group.content_type, dims))
                    .map_err(|e| {
                        EmbeddingError::Inference(format!("{} output: {e}", group.content_type))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if sizes.windows(2).any(|pair| pair[0].1 != pair[1].1) {
            return Err(EmbeddingError::DimensionMismatch { sizes });
        }

        Ok((restore_order(&groups, &outputs, documents.len())?, sizes))
    }

    fn missing_model(&self, content_type: ContentType) -> EmbeddingError {
        EmbeddingError::MissingModel {
            content_type,
            initialized: self.content_types(),
        }
    }

    /// Content types this embedder has a model for.
    pub fn content_types(&self) -> Vec<ContentType> {
        self.models.keys().copied().collect()
    }

    /// Output width of the model serving `content_type`.
    pub fn output_dims(&self, content_type: ContentType) -> Option<usize> {
        self.models.get(&content_type).map(Encoder::output_dims)
    }

    /// Configured identifier of the model serving `content_type`.
    pub fn model_name(&self, content_type: ContentType) -> Option<&str> {
        self.model_names.get(&content_type).map(String::as_str)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

fn validate_config(config: &EmbedderConfig) -> Result<(), EmbeddingError> {
    if config.batch_size == 0 {
        return Err(EmbeddingError::InvalidInput("batch_size must be greater than 0".into()));
    }
    if config.embedding_models.is_empty() {
        return Err(EmbeddingError::InvalidInput("at least one embedding model is required".into()));
    }
    if let Some((content_type, model)) = config
        .embedding_models
        .iter()
        .find(|(_, model)| model.trim().is_empty())
    {
        return Err(EmbeddingError::InvalidInput(format!(
            "'{model}' is not a valid model name or path for {content_type}"
        )));
    }
    Ok(())
}

/// Stacks per-type outputs and permutes rows back to document order.
fn restore_order(
    groups: &[DataGroup],
    outputs: &[Tensor],
    rows: usize,
) -> Result<Tensor, EmbeddingError> {
    let stacked = Tensor::cat(outputs, 0)
        .map_err(|e| EmbeddingError::Inference(format!("stacking outputs: {e}")))?;

    let mut order = vec![0u32; rows];
    for (stacked_row, &position) in groups.iter().flat_map(|g| &g.positions).enumerate() {
        order[position] = u32::try_from(stacked_row)
            .map_err(|_| {
                EmbeddingError::InvalidInput(format!("batch of {rows} rows is too large"))
            })?;
    }
    let index = Tensor::new(order.as_slice(), &Device::Cpu)
        .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
    stacked
        .index_select(&index, 0)
        .map_err(|e| EmbeddingError::Inference(format!("restoring document order: {e}")))
}
