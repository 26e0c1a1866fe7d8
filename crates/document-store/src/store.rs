//! The document store interface consumed by retrievers.

use mosaic_core::{Document, Filters, SimilarityFunction};

use crate::error::DocumentStoreError;

/// Persistence and nearest-neighbour lookup over embedded documents.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Similarity used to rank `query_by_embedding` results.
    fn similarity(&self) -> SimilarityFunction;

    /// Inserts documents, replacing stored documents with the same id.
    async fn write_documents(&self, documents: Vec<Document>) -> Result<(), DocumentStoreError>;

    /// Returns up to `top_k` documents ranked by similarity to `query_embedding`,
    /// most similar first.
    ///
    /// Each returned document carries its score, mapped into `[0, 1]` when
    /// `scale_score` is set. Documents without an embedding are never returned.
    async fn query_by_embedding(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: Option<&Filters>,
        scale_score: bool,
    ) -> Result<Vec<Document>, DocumentStoreError>;

    /// Returns every document matching `filters`, in insertion order.
    async fn get_all_documents(
        &self,
        filters: Option<&Filters>,
        return_embedding: bool,
    ) -> Result<Vec<Document>, DocumentStoreError>;

    async fn get_document_count(
        &self,
        filters: Option<&Filters>,
    ) -> Result<usize, DocumentStoreError>;

    /// Deletes documents matching both `ids` (all when `None`) and `filters`.
    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filters: Option<&Filters>,
    ) -> Result<(), DocumentStoreError>;
}

pub(crate) fn passes(filters: Option<&Filters>, document: &Document) -> bool {
    filters.is_none_or(|f| mosaic_core::filter::matches(f, &document.meta))
}

/// Collapses documents sharing an id into one, keeping the last version at the first position.
pub(crate) fn dedup_by_id(documents: Vec<Document>) -> Vec<Document> {
    let mut unique: Vec<Document> = Vec::with_capacity(documents.len());
    for document in documents {
        match unique.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => unique.push(document),
        }
    }
    unique
}

/// Scores embedded candidates, sorts them best first (stable on ties) and keeps `top_k`.
pub(crate) fn rank(
    candidates: Vec<Document>,
    query_embedding: &[f32],
    similarity: SimilarityFunction,
    top_k: usize,
    scale_score: bool,
) -> Result<Vec<Document>, DocumentStoreError> {
    let mut scored = Vec::with_capacity(candidates.len());
    for mut document in candidates {
        let Some(embedding) = document.embedding.as_deref() else {
            continue;
        };
        if embedding.len() != query_embedding.len() {
            return Err(DocumentStoreError::DimensionMismatch {
                expected: embedding.len(),
                actual: query_embedding.len(),
            });
        }
        let raw = similarity.score(query_embedding, embedding);
        document.score = Some(if scale_score {
            similarity.scale_to_unit_interval(raw)
        } else {
            raw
        });
        scored.push(document);
    }

    scored.sort_by(|a, b| {
        let (a, b) = (a.score.unwrap_or(f32::MIN), b.score.unwrap_or(f32::MIN));
        b.total_cmp(&a)
    });
    scored.truncate(top_k);
    Ok(scored)
}
