//! Dense retrieval over a document store with multimodal embedders.

use std::fmt;
use std::sync::Arc;

use mosaic_core::{ContentType, Document, Filters};
use mosaic_document_store::DocumentStore;
use mosaic_embedding::{EmbeddingError, ModelLoader, MultiModalEmbedder};

use crate::config::{RankingMode, RetrieverConfig};
use crate::error::RetrieverError;
use crate::ranking::rank_locally;

/// Metadata filters for a batch of queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryFilters {
    #[default]
    None,
    /// Applied to every query.
    Single(Filters),
    /// One filter per query, in query order.
    PerQuery(Vec<Filters>),
}

impl QueryFilters {
    /// Expands into exactly one optional filter per query. Empty filters select everything.
    pub fn per_query(self, queries: usize) -> Result<Vec<Option<Filters>>, RetrieverError> {
        let non_empty = |filters: Filters| (!filters.is_empty()).then_some(filters);
        match self {
            Self::None => Ok(vec![None; queries]),
            Self::Single(filters) => Ok(vec![non_empty(filters); queries]),
            Self::PerQuery(filters) if filters.len() == queries => {
                Ok(filters.into_iter().map(non_empty).collect())
            }
            Self::PerQuery(filters) => Err(RetrieverError::FilterCountMismatch {
                filters: filters.len(),
                queries,
            }),
        }
    }
}

impl From<Filters> for QueryFilters {
    fn from(filters: Filters) -> Self {
        Self::Single(filters)
    }
}

impl From<Option<Filters>> for QueryFilters {
    fn from(filters: Option<Filters>) -> Self {
        filters.map_or(Self::None, Self::Single)
    }
}

impl From<Vec<Filters>> for QueryFilters {
    fn from(filters: Vec<Filters>) -> Self {
        Self::PerQuery(filters)
    }
}

/// Embeds queries and looks up the most similar stored documents.
///
/// When the passage model for the query content type is the query model, both
/// roles hold the same embedder instance so queries and passages are always
/// embedded by identical weights.
pub struct MultiModalRetriever {
    config: RetrieverConfig,
    store: Arc<dyn DocumentStore>,
    passage_embedder: Arc<MultiModalEmbedder>,
    query_embedder: Arc<MultiModalEmbedder>,
}

impl fmt::Debug for MultiModalRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiModalRetriever")
            .field("config", &self.config)
            .field("passage_embedder", &self.passage_embedder)
            .field("shares_query_embedder", &self.shares_query_embedder())
            .finish_non_exhaustive()
    }
}

impl MultiModalRetriever {
    /// Loads the passage embedder and, unless it can be shared, a separate query embedder.
    pub fn new(
        config: RetrieverConfig,
        store: Arc<dyn DocumentStore>,
        loader: &dyn ModelLoader,
    ) -> Result<Self, RetrieverError> {
        validate_config(&config)?;
        let passage_embedder =
            Arc::new(MultiModalEmbedder::new(&config.passage_embedder_config(), loader)?);
        let query_embedder = if config.shares_query_model() {
            Arc::clone(&passage_embedder)
        } else {
            Arc::new(MultiModalEmbedder::new(&config.query_embedder_config(), loader)?)
        };
        Self::from_embedders(config, store, passage_embedder, query_embedder)
    }

    /// Builds a retriever around already constructed embedders.
    pub fn from_embedders(
        config: RetrieverConfig,
        store: Arc<dyn DocumentStore>,
        passage_embedder: Arc<MultiModalEmbedder>,
        query_embedder: Arc<MultiModalEmbedder>,
    ) -> Result<Self, RetrieverError> {
        validate_config(&config)?;
        if query_embedder.output_dims(config.query_type).is_none() {
            return Err(RetrieverError::Embedding(EmbeddingError::MissingModel {
                content_type: config.query_type,
                initialized: query_embedder.content_types(),
            }));
        }
        if config.ranking == RankingMode::Store
            && store.similarity() != config.similarity_function
        {
            tracing::warn!(
                configured = %config.similarity_function,
                store = %store.similarity(),
                "document store ranks with a different similarity function"
            );
        }
        let retriever = Self {
            config,
            store,
            passage_embedder,
            query_embedder,
        };
        tracing::info!(
            query_type = %retriever.config.query_type,
            query_model = %retriever.config.query_embedding_model,
            shared = retriever.shares_query_embedder(),
            "retriever ready"
        );
        Ok(retriever)
    }

    /// Retrieves the documents most similar to one query.
    pub async fn retrieve(
        &self,
        query: &str,
        filters: Option<Filters>,
        top_k: Option<usize>,
        scale_score: Option<bool>,
    ) -> Result<Vec<Document>, RetrieverError> {
        let mut results = self
            .retrieve_batch(&[query], filters.into(), top_k, Some(1), scale_score)
            .await?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Retrieves one ranked document list per query, in query order.
    ///
    /// `None` arguments fall back to the configured defaults. A single filter
    /// is applied to every query; a filter list must have one entry per query.
    pub async fn retrieve_batch(
        &self,
        queries: &[&str],
        filters: QueryFilters,
        top_k: Option<usize>,
        batch_size: Option<usize>,
        scale_score: Option<bool>,
    ) -> Result<Vec<Vec<Document>>, RetrieverError> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(RetrieverError::InvalidInput("top_k must be greater than 0".into()));
        }
        let batch_size = batch_size.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(RetrieverError::InvalidInput("batch_size must be greater than 0".into()));
        }
        let scale_score = scale_score.unwrap_or(self.config.scale_score);
        let filters = filters.per_query(queries.len())?;
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let documents = queries
            .iter()
            .map(|query| self.query_document(query))
            .collect::<Result<Vec<_>, _>>()?;
        let embeddings = embed_rows(&self.query_embedder, documents, Some(batch_size)).await?;

        let mut results = Vec::with_capacity(queries.len());
        for (index, (embedding, filters)) in embeddings.iter().zip(&filters).enumerate() {
            tracing::debug!(
                query = index,
                top_k,
                filtered = filters.is_some(),
                "looking up documents"
            );
            results.push(self.lookup(embedding, filters.as_ref(), top_k, scale_score).await?);
        }
        Ok(results)
    }

    /// Embeds documents with the passage embedder, one row per document.
    pub async fn embed_documents(
        &self,
        documents: &[Document],
    ) -> Result<Vec<Vec<f32>>, RetrieverError> {
        embed_rows(&self.passage_embedder, documents.to_vec(), None).await
    }

    /// Embeds queries with the query embedder, one row per query.
    pub async fn embed_queries(&self, queries: &[&str]) -> Result<Vec<Vec<f32>>, RetrieverError> {
        let documents = queries
            .iter()
            .map(|query| self.query_document(query))
            .collect::<Result<Vec<_>, _>>()?;
        embed_rows(&self.query_embedder, documents, None).await
    }

    async fn lookup(
        &self,
        embedding: &[f32],
        filters: Option<&Filters>,
        top_k: usize,
        scale_score: bool,
    ) -> Result<Vec<Document>, RetrieverError> {
        match self.config.ranking {
            RankingMode::Store => Ok(self
                .store
                .query_by_embedding(embedding, top_k, filters, scale_score)
                .await?),
            RankingMode::Local { logit_scale } => {
                let candidates = self.store.get_all_documents(filters, true).await?;
                rank_locally(embedding, candidates, logit_scale, top_k)
            }
        }
    }

    fn query_document(&self, query: &str) -> Result<Document, RetrieverError> {
        match self.config.query_type {
            ContentType::Text => Ok(Document::text(query)),
            ContentType::Image => Ok(Document::image(query)),
            ContentType::Table => Err(RetrieverError::InvalidInput(
                "queries of type 'table' cannot be built from a string".into(),
            )),
        }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn passage_embedder(&self) -> &Arc<MultiModalEmbedder> {
        &self.passage_embedder
    }

    pub fn query_embedder(&self) -> &Arc<MultiModalEmbedder> {
        &self.query_embedder
    }

    /// Whether queries and passages are embedded by the same instance.
    pub fn shares_query_embedder(&self) -> bool {
        Arc::ptr_eq(&self.passage_embedder, &self.query_embedder)
    }
}

fn validate_config(config: &RetrieverConfig) -> Result<(), RetrieverError> {
    if config.top_k == 0 {
        return Err(RetrieverError::InvalidInput("top_k must be greater than 0".into()));
    }
    if config.batch_size == 0 {
        return Err(RetrieverError::InvalidInput("batch_size must be greater than 0".into()));
    }
    Ok(())
}

/// Runs the embedder off the async workers and returns its rows.
async fn embed_rows(
    embedder: &Arc<MultiModalEmbedder>,
    documents: Vec<Document>,
    batch_size: Option<usize>,
) -> Result<Vec<Vec<f32>>, RetrieverError> {
    let embedder = Arc::clone(embedder);
    let matrix = tokio::task::spawn_blocking(move || embedder.embed(&documents, batch_size))
        .await
        .map_err(|e| RetrieverError::Task(e.to_string()))??;
    matrix
        .to_vec2::<f32>()
        .map_err(|e| EmbeddingError::Inference(format!("reading embeddings: {e}")).into())
}
