//! Configuration for the LanceDB-backed store.

use std::path::PathBuf;

use mosaic_core::SimilarityFunction;
use serde::{Deserialize, Serialize};

/// Configuration for creating a [`crate::lance::LanceDocumentStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanceStoreConfig {
    /// Database directory.
    pub path: PathBuf,
    #[serde(default = "default_table")]
    pub table: String,
    /// Width of every stored embedding.
    pub embedding_dim: usize,
    #[serde(default)]
    pub similarity: SimilarityFunction,
}

fn default_table() -> String {
    "documents".to_owned()
}

impl LanceStoreConfig {
    pub fn new(path: impl Into<PathBuf>, embedding_dim: usize) -> Self {
        Self {
            path: path.into(),
            table: default_table(),
            embedding_dim,
            similarity: SimilarityFunction::default(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_similarity(mut self, similarity: SimilarityFunction) -> Self {
        self.similarity = similarity;
        self
    }
}
