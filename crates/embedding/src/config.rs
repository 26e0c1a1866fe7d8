//! Configuration for the multimodal embedder.

use std::collections::BTreeMap;

use mosaic_core::ContentType;
use serde::{Deserialize, Serialize};

use crate::encoder::ModelParams;
use crate::loader::LoadOptions;

/// Default text checkpoint used when no model is configured.
pub const DEFAULT_TEXT_MODEL: &str = "facebook/data2vec-text-base";

/// Parameters handed to a feature extractor on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Maximum input length in tokens; longer inputs are truncated.
    pub max_length: usize,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self { max_length: 256 }
    }
}

impl ExtractionParams {
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }
}

/// Configuration for a [`crate::embedder::MultiModalEmbedder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Model identifier (local path or remote name) per content type.
    pub embedding_models: BTreeMap<ContentType, String>,
    /// Feature extractor overrides per content type.
    pub feature_extractors_params: BTreeMap<ContentType, ExtractionParams>,
    /// Construction parameters per content type, applied over the architecture defaults.
    pub model_params: BTreeMap<ContentType, ModelParams>,
    /// Number of documents embedded per forward pass, across all devices.
    pub batch_size: usize,
    /// Enables prefixing text and table payloads with document metadata when non-empty.
    pub embed_meta_fields: Vec<String>,
    /// Device names such as `cpu`, `cuda:0` or `metal`. `None` uses every visible accelerator.
    pub devices: Option<Vec<String>>,
    /// Token used to fetch private checkpoints.
    pub auth_token: Option<String>,
    /// Checkpoint revision to load.
    pub revision: Option<String>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            embedding_models: BTreeMap::from([(ContentType::Text, DEFAULT_TEXT_MODEL.to_owned())]),
            feature_extractors_params: BTreeMap::new(),
            model_params: BTreeMap::new(),
            batch_size: 16,
            embed_meta_fields: vec!["name".to_owned()],
            devices: None,
            auth_token: None,
            revision: None,
        }
    }
}

impl EmbedderConfig {
    /// Creates a builder with default values.
    pub fn builder() -> EmbedderConfigBuilder {
        EmbedderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Extraction parameters for `content_type`, falling back to the defaults.
    pub fn extraction_params(&self, content_type: ContentType) -> ExtractionParams {
        self.feature_extractors_params
            .get(&content_type)
            .cloned()
            .unwrap_or_default()
    }

    /// User construction parameters for `content_type`.
    pub fn model_params(&self, content_type: ContentType) -> ModelParams {
        self.model_params
            .get(&content_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn embeds_meta(&self) -> bool {
        !self.embed_meta_fields.is_empty()
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            auth_token: self.auth_token.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// Builder for `EmbedderConfig`.
#[derive(Debug)]
#[must_use]
pub struct EmbedderConfigBuilder {
    config: EmbedderConfig,
}

impl EmbedderConfigBuilder {
    /// Replaces every configured model with `models`.
    pub fn embedding_models(
        mut self,
        models: impl IntoIterator<Item = (ContentType, impl Into<String>)>,
    ) -> Self {
        self.config.embedding_models = models.into_iter().map(|(t, m)| (t, m.into())).collect();
        self
    }

    /// Sets the model for one content type.
    pub fn model(mut self, content_type: ContentType, model: impl Into<String>) -> Self {
        self.config.embedding_models.insert(content_type, model.into());
        self
    }

    pub fn extraction_params(
        mut self,
        content_type: ContentType,
        params: ExtractionParams,
    ) -> Self {
        self.config
            .feature_extractors_params
            .insert(content_type, params);
        self
    }

    pub fn model_params(mut self, content_type: ContentType, params: ModelParams) -> Self {
        self.config.model_params.insert(content_type, params);
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

    pub fn build(self) -> EmbedderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = EmbedderConfig::default();
        assert_eq!(
            config.embedding_models.get(&ContentType::Text).map(String::as_str),
            Some(DEFAULT_TEXT_MODEL)
        );
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.embed_meta_fields, vec!["name".to_string()]);
        assert!(config.devices.is_none());
        assert!(config.embeds_meta());
    }

    #[test]
    fn extraction_params_default_to_256_tokens() {
        let config = EmbedderConfig::default();
        for ty in ContentType::ALL {
            assert_eq!(config.extraction_params(ty).max_length, 256);
        }
    }

    #[test]
    fn extraction_override_applies_to_one_type_only() {
        let config = EmbedderConfig::builder()
            .extraction_params(ContentType::Table, ExtractionParams::with_max_length(512))
            .build();
        assert_eq!(config.extraction_params(ContentType::Table).max_length, 512);
        assert_eq!(config.extraction_params(ContentType::Text).max_length, 256);
    }

    #[test]
    fn builder_replaces_models() {
        let config = EmbedderConfig::builder()
            .embedding_models([(ContentType::Image, "org/vision")])
            .build();
        assert_eq!(config.embedding_models.len(), 1);
        assert_eq!(config.embedding_models[&ContentType::Image], "org/vision");
    }

    #[test]
    fn builder_chains_all_fields() {
        let config = EmbedderConfig::builder()
            .model(ContentType::Table, "org/table")
            .batch_size(4)
            .embed_meta_fields(vec![])
            .devices(vec!["cpu".into()])
            .auth_token("secret")
            .revision("main")
            .build();
        assert_eq!(config.embedding_models.len(), 2);
        assert_eq!(config.batch_size, 4);
        assert!(!config.embeds_meta());
        assert_eq!(config.devices, Some(vec!["cpu".to_string()]));
        let options = config.load_options();
        assert_eq!(options.auth_token.as_deref(), Some("secret"));
        assert_eq!(options.revision.as_deref(), Some("main"));
    }

    #[test]
    fn deserializes_with_content_type_keys() {
        let json = serde_json::json!({
            "embedding_models": {"text": "a", "image": "b"},
            "feature_extractors_params": {"text": {"max_length": 64}},
            "batch_size": 8
        });
        let config: EmbedderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.embedding_models[&ContentType::Image], "b");
        assert_eq!(config.extraction_params(ContentType::Text).max_length, 64);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.embed_meta_fields, vec!["name".to_string()]);
    }
}
