//! Tokenizer-backed feature extraction for text and table samples.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use candle_core::{Device, Tensor};
use tokenizers::{
    Encoding, PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use crate::config::ExtractionParams;
use crate::error::EmbeddingError;
use crate::features::{FeatureBatch, FeatureExtractor, Payload};

/// Produces `input_ids`, `token_type_ids` and `attention_mask`, padded to the longest sample.
pub struct TokenizerFeatureExtractor {
    base: Tokenizer,
    /// Copies of `base` with truncation and batch-longest padding set, keyed by max length.
    truncating: Mutex<HashMap<usize, Arc<Tokenizer>>>,
}

impl std::fmt::Debug for TokenizerFeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerFeatureExtractor")
            .field("vocab_size", &self.base.get_vocab_size(true))
            .finish_non_exhaustive()
    }
}

impl TokenizerFeatureExtractor {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            base: tokenizer,
            truncating: Mutex::new(HashMap::new()),
        }
    }

    /// Loads a `tokenizer.json`.
    pub fn from_file(path: &Path) -> Result<Self, EmbeddingError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| {
                EmbeddingError::ModelLoad(format!("loading tokenizer {}: {e}", path.display()))
            })?;
        tracing::debug!(path = %path.display(), "tokenizer loaded");
        Ok(Self::new(tokenizer))
    }

    fn tokenizer_for(&self, max_length: usize) -> Result<Arc<Tokenizer>, EmbeddingError> {
        let mut cache = self
            .truncating
            .lock()
            .map_err(|e| EmbeddingError::Tokenization(format!("tokenizer cache poisoned: {e}")))?;
        if let Some(tokenizer) = cache.get(&max_length) {
            return Ok(Arc::clone(tokenizer));
        }

        let mut tokenizer = self.base.clone();
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| {
                EmbeddingError::Tokenization(format!("setting truncation to {max_length}: {e}"))
            })?;
        let padding = self.base.get_padding().cloned().unwrap_or_default();
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            ..padding
        }));

        let tokenizer = Arc::new(tokenizer);
        cache.insert(max_length, Arc::clone(&tokenizer));
        Ok(tokenizer)
    }

}

impl FeatureExtractor for TokenizerFeatureExtractor {
    fn extract(
        &self,
        data: &[Payload],
        params: &ExtractionParams,
    ) -> Result<FeatureBatch, EmbeddingError> {
        if params.max_length == 0 {
            return Err(EmbeddingError::InvalidInput("max_length must be greater than 0".into()));
        }
        let texts = data
            .iter()
            .map(|p| {
                p.as_text().map(str::to_owned).ok_or_else(|| {
                    EmbeddingError::InvalidInput(format!(
                        "tokenizer received a {} payload",
                        p.kind()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if texts.is_empty() {
            return Ok(FeatureBatch::new());
        }

        let tokenizer = self.tokenizer_for(params.max_length)?;
        let encodings = tokenizer
            .encode_batch(texts, true)
            .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

        let batch_size = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let device = Device::Cpu;
        let tensor = |name: &str, field: fn(&Encoding) -> &[u32]| {
            let values: Vec<u32> =
                encodings.iter().flat_map(|e| field(e).iter().copied()).collect();
            Tensor::from_vec(values, (batch_size, seq_len), &device)
                .map_err(|e| EmbeddingError::Tokenization(format!("{name} tensor: {e}")))
        };
        Ok(FeatureBatch::new()
            .with("input_ids", tensor("input_ids", Encoding::get_ids)?)
            .with("token_type_ids", tensor("token_type_ids", Encoding::get_type_ids)?)
            .with(
                "attention_mask",
                tensor("attention_mask", Encoding::get_attention_mask)?,
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn word_level() -> Tokenizer {
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"[UNK]": 0, "what": 1, "is": 2, "rust": 3, "a": 4, "language": 5},
                "unk_token": "[UNK]"
            }
        });
        Tokenizer::from_str(&json.to_string()).unwrap()
    }

    fn texts(values: &[&str]) -> Vec<Payload> {
        values.iter().map(|v| Payload::Text((*v).to_owned())).collect()
    }

    #[test]
    fn produces_three_text_slots() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let features = extractor
            .extract(&texts(&["what is rust"]), &ExtractionParams::default())
            .unwrap();
        let names: Vec<&str> = features.names().collect();
        assert_eq!(names, vec!["attention_mask", "input_ids", "token_type_ids"]);
    }

    #[test]
    fn pads_to_longest_sample() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let features = extractor
            .extract(&texts(&["rust", "rust is a language"]), &ExtractionParams::default())
            .unwrap();
        let ids: Vec<Vec<u32>> = features.get("input_ids").unwrap().to_vec2().unwrap();
        let mask: Vec<Vec<u32>> = features.get("attention_mask").unwrap().to_vec2().unwrap();
        assert_eq!(ids, vec![vec![3, 0, 0, 0], vec![3, 2, 4, 5]]);
        assert_eq!(mask, vec![vec![1, 0, 0, 0], vec![1, 1, 1, 1]]);
    }

    #[test]
    fn padding_keeps_the_configured_pad_id() {
        let mut tokenizer = word_level();
        tokenizer.with_padding(Some(PaddingParams {
            pad_id: 4,
            pad_token: "a".into(),
            ..PaddingParams::default()
        }));
        let extractor = TokenizerFeatureExtractor::new(tokenizer);
        let features = extractor
            .extract(&texts(&["rust is", "what"]), &ExtractionParams::default())
            .unwrap();
        let ids: Vec<Vec<u32>> = features.get("input_ids").unwrap().to_vec2().unwrap();
        let types: Vec<Vec<u32>> = features.get("token_type_ids").unwrap().to_vec2().unwrap();
        assert_eq!(ids, vec![vec![3, 2], vec![1, 4]]);
        assert_eq!(types, vec![vec![0, 0], vec![0, 0]]);
    }

    #[test]
    fn padding_and_truncation_combine() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let features = extractor
            .extract(&texts(&["rust is a language", "what"]), &ExtractionParams::with_max_length(3))
            .unwrap();
        let mask: Vec<Vec<u32>> = features.get("attention_mask").unwrap().to_vec2().unwrap();
        assert_eq!(mask, vec![vec![1, 1, 1], vec![1, 0, 0]]);
    }

    #[test]
    fn truncates_to_max_length() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let features = extractor
            .extract(&texts(&["rust is a language"]), &ExtractionParams::with_max_length(2))
            .unwrap();
        let ids: Vec<Vec<u32>> = features.get("input_ids").unwrap().to_vec2().unwrap();
        assert_eq!(ids, vec![vec![3, 2]]);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let features = extractor
            .extract(&texts(&["what is zig"]), &ExtractionParams::default())
            .unwrap();
        let ids: Vec<Vec<u32>> = features.get("input_ids").unwrap().to_vec2().unwrap();
        assert_eq!(ids, vec![vec![1, 2, 0]]);
    }

    #[test]
    fn truncating_tokenizers_are_cached_per_length() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let a = extractor.tokenizer_for(8).unwrap();
        let b = extractor.tokenizer_for(8).unwrap();
        let c = extractor.tokenizer_for(16).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn zero_max_length_is_rejected() {
        let extractor = TokenizerFeatureExtractor::new(word_level());
        let err = extractor
            .extract(&texts(&["rust"]), &ExtractionParams::with_max_length(0))
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = TokenizerFeatureExtractor::from_file(Path::new("/nonexistent/tokenizer.json"))
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::ModelLoad(_)));
    }
}
