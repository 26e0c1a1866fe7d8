//! Configuration for the multimodal retriever.

use std::collections::BTreeMap;

use mosaic_core::{ContentType, SimilarityFunction};
use mosaic_embedding::config::DEFAULT_TEXT_MODEL;
use mosaic_embedding::{EmbedderConfig, ExtractionParams, ModelParams};
use serde::{Deserialize, Serialize};

/// `ln(1 / 0.07)`, the initial temperature of contrastively trained dual encoders.
pub const DEFAULT_LOGIT_SCALE: f64 = 2.659_260_036_932_778;

/// Where candidate documents are scored against a query embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RankingMode {
    /// The document store ranks with its own similarity function.
    #[default]
    Store,
    /// Every filtered candidate is fetched and scored with scaled cosine similarity.
    Local { logit_scale: f64 },
}

impl RankingMode {
    pub fn local() -> Self {
        Self::Local {
            logit_scale: DEFAULT_LOGIT_SCALE,
        }
    }
}

/// Configuration for a [`crate::retriever::MultiModalRetriever`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Content type every query is wrapped in.
    pub query_type: ContentType,
    pub query_embedding_model: String,
    pub passage_embedding_models: BTreeMap<ContentType, String>,
    pub query_feature_extractor_params: ExtractionParams,
    pub passage_feature_extractors_params: BTreeMap<ContentType, ExtractionParams>,
    pub model_params: BTreeMap<ContentType, ModelParams>,
    pub top_k: usize,
    pub batch_size: usize,
    pub embed_meta_fields: Vec<String>,
    /// Expected similarity of the document store; a different store similarity is logged.
    pub similarity_function: SimilarityFunction,
    pub devices: Option<Vec<String>>,
    pub auth_token: Option<String>,
    pub revision: Option<String>,
    pub scale_score: bool,
    pub ranking: RankingMode,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            query_type: ContentType::Text,
            query_embedding_model: DEFAULT_TEXT_MODEL.to_owned(),
            passage_embedding_models: BTreeMap::from([(
                ContentType::Text,
                DEFAULT_TEXT_MODEL.to_owned(),
            )]),
            query_feature_extractor_params: ExtractionParams::with_max_length(64),
            passage_feature_extractors_params: BTreeMap::new(),
            model_params: BTreeMap::new(),
            top_k: 10,
            batch_size: 16,
            embed_meta_fields: vec!["name".to_owned()],
            similarity_function: SimilarityFunction::DotProduct,
            devices: None,
            auth_token: None,
            revision: None,
            scale_score: true,
            ranking: RankingMode::Store,
        }
    }
}

impl RetrieverConfig {
    /// Creates a builder with default values.
    pub fn builder() -> RetrieverConfigBuilder {
        RetrieverConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether the passage model for the query type is the query model itself.
    pub fn shares_query_model(&self) -> bool {
        self.passage_embedding_models
            .get(&self.query_type)
            .is_some_and(|model| *model == self.query_embedding_model)
    }

    /// Embedder configuration for the passage side.
    pub fn passage_embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            embedding_models: self.passage_embedding_models.clone(),
            feature_extractors_params: self.passage_feature_extractors_params.clone(),
            model_params: self.model_params.clone(),
            batch_size: self.batch_size,
            embed_meta_fields: self.embed_meta_fields.clone(),
            devices: self.devices.clone(),
            auth_token: self.auth_token.clone(),
            revision: self.revision.clone(),
        }
    }

    /// Embedder configuration for the query side. Queries never carry metadata.
    pub fn query_embedder_config(&self) -> EmbedderConfig {
        let model_params = self
            .model_params
            .get(&self.query_type)
            .map(|params| BTreeMap::from([(self.query_type, params.clone())]))
            .unwrap_or_default();
        EmbedderConfig {
            embedding_models: BTreeMap::from([(
                self.query_type,
                self.query_embedding_model.clone(),
            )]),
            feature_extractors_params: BTreeMap::from([(
                self.query_type,
                self.query_feature_extractor_params.clone(),
            )]),
            model_params,
            batch_size: self.batch_size,
            embed_meta_fields: Vec::new(),
            devices: self.devices.clone(),
            auth_token: self.auth_token.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// Builder for `RetrieverConfig`.
#[derive(Debug)]
#[must_use]
pub struct RetrieverConfigBuilder {
    config: RetrieverConfig,
}

impl RetrieverConfigBuilder {
    pub fn query_type(mut self, query_type: ContentType) -> Self {
        self.config.query_type = query_type;
        self
    }

    pub fn query_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.query_embedding_model = model.into();
        self
    }

    /// Replaces every passage model with `models`.
    pub fn passage_embedding_models(
        mut self,
        models: impl IntoIterator<Item = (ContentType, impl Into<String>)>,
    ) -> Self {
        self.config.passage_embedding_models =
            models.into_iter().map(|(t, m)| (t, m.into())).collect();
        self
    }

    pub fn passage_model(mut self, content_type: ContentType, model: impl Into<String>) -> Self {
        self.config
            .passage_embedding_models
            .insert(content_type, model.into());
        self
    }

    pub fn query_extraction_params(mut self, params: ExtractionParams) -> Self {
        self.config.query_feature_extractor_params = params;
        self
    }

    pub fn passage_extraction_params(
        mut self,
        content_type: ContentType,
        params: ExtractionParams,
    ) -> Self {
        self.config
            .passage_feature_extractors_params
            .insert(content_type, params);
        self
    }

    pub fn model_params(mut self, content_type: ContentType, params: ModelParams) -> Self {
        self.config.model_params.insert(content_type, params);
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.top_k = top_k;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn embed_meta_fields(mut self, fields: Vec<String>) -> Self {
        self.config.embed_meta_fields = fields;
        self
    }

    pub fn similarity_function(mut self, similarity: SimilarityFunction) -> Self {
        self.config.similarity_function = similarity;
        self
    }

    pub fn devices(mut self, devices: Vec<String>) -> Self {
        self.config.devices = Some(devices);
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.config.revision = Some(revision.into());
        self
    }

    pub fn scale_score(mut self, scale_score: bool) -> Self {
        self.config.scale_score = scale_score;
        self
    }

    pub fn ranking(mut self, ranking: RankingMode) -> Self {
        self.config.ranking = ranking;
        self
    }

    pub fn build(self) -> RetrieverConfig {
        self.config
    }
}
