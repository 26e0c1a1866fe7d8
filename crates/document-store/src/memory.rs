//! Exact-search document store held in memory.

use mosaic_core::{Document, Filters, SimilarityFunction};
use tokio::sync::RwLock;

use crate::error::DocumentStoreError;
use crate::store::{DocumentStore, passes, rank};

/// Keeps documents in insertion order and scores every candidate on query.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
    similarity: SimilarityFunction,
}

impl InMemoryDocumentStore {
    pub fn new(similarity: SimilarityFunction) -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            similarity,
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn similarity(&self) -> SimilarityFunction {
        self.similarity
    }

    async fn write_documents(&self, documents: Vec<Document>) -> Result<(), DocumentStoreError> {
        let mut stored = self.documents.write().await;
        for document in documents {
            if document.id.is_empty() {
                return Err(DocumentStoreError::InvalidInput(
                    "document id must not be empty".into(),
                ));
            }
            match stored.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => stored.push(document),
            }
        }
        tracing::debug!(count = stored.len(), "in-memory store updated");
        Ok(())
    }

    async fn query_by_embedding(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: Option<&Filters>,
        scale_score: bool,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        if query_embedding.is_empty() {
            return Err(DocumentStoreError::InvalidInput(
                "query embedding must not be empty".into(),
            ));
        }
        let candidates: Vec<Document> = self
            .documents
            .read()
            .await
            .iter()
            .filter(|d| passes(filters, d))
            .cloned()
            .collect();
        rank(candidates, query_embedding, self.similarity, top_k, scale_score)
    }

    async fn get_all_documents(
        &self,
        filters: Option<&Filters>,
        return_embedding: bool,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .filter(|d| passes(filters, d))
            .map(|d| {
                let mut document = d.clone();
                if !return_embedding {
                    document.embedding = None;
                }
                document
            })
            .collect())
    }

    async fn get_document_count(
        &self,
        filters: Option<&Filters>,
    ) -> Result<usize, DocumentStoreError> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .filter(|d| passes(filters, d))
            .count())
    }

    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filters: Option<&Filters>,
    ) -> Result<(), DocumentStoreError> {
        self.documents.write().await.retain(|d| {
            let selected = ids.is_none_or(|ids| ids.contains(&d.id)) && passes(filters, d);
            !selected
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(value: serde_json::Value) -> Filters {
        value.as_object().cloned().unwrap()
    }

    fn doc(id: &str, embedding: Vec<f32>, lang: &str) -> Document {
        Document::text(format!("doc {id}"))
            .with_id(id)
            .with_embedding(embedding)
            .with_meta("lang", lang)
    }

    async fn seeded(similarity: SimilarityFunction) -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new(similarity);
        store
            .write_documents(vec![
                doc("a", vec![1.0, 0.0], "en"),
                doc("b", vec![0.0, 1.0], "de"),
                doc("c", vec![0.7, 0.7], "en"),
            ])
            .await
            .unwrap();
        store
    }

    // === Write ===

    #[tokio::test]
    async fn write_replaces_documents_with_same_id() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        store
            .write_documents(vec![doc("a", vec![5.0, 5.0], "fr")])
            .await
            .unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 3);
        let fr = store
            .get_all_documents(Some(&filters(json!({"lang": "fr"}))), true)
            .await
            .unwrap();
        assert_eq!(fr[0].embedding, Some(vec![5.0, 5.0]));
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_write_keep_the_last() {
        let store = InMemoryDocumentStore::default();
        store
            .write_documents(vec![
                doc("same", vec![1.0, 0.0], "en"),
                doc("same", vec![0.0, 1.0], "de"),
            ])
            .await
            .unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 1);
        let all = store.get_all_documents(None, true).await.unwrap();
        assert_eq!(all[0].meta["lang"], "de");
    }

    #[tokio::test]
    async fn write_rejects_empty_id() {
        let store = InMemoryDocumentStore::default();
        let result = store.write_documents(vec![Document::text("x").with_id("")]).await;
        assert!(result.is_err());
    }

    // === Query ===

    #[tokio::test]
    async fn query_ranks_by_dot_product() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        let results = store.query_by_embedding(&[1.0, 0.1], 2, None, false).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(results[0].score.unwrap() > results[1].score.unwrap());
    }

    #[tokio::test]
    async fn query_applies_filters() {
        let store = seeded(SimilarityFunction::Cosine).await;
        let results = store
            .query_by_embedding(&[0.0, 1.0], 10, Some(&filters(json!({"lang": "en"}))), true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|d| d.meta["lang"] == "en"));
        assert!(results.iter().all(|d| (0.0..=1.0).contains(&d.score.unwrap())));
    }

    #[tokio::test]
    async fn query_with_membership_filter() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        let results = store
            .query_by_embedding(
                &[1.0, 1.0],
                10,
                Some(&filters(json!({"lang": ["de", "fr"]}))),
                false,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn query_on_empty_store_returns_empty() {
        let store = InMemoryDocumentStore::default();
        let results = store.query_by_embedding(&[1.0], 5, None, true).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn query_rejects_empty_embedding() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        assert!(store.query_by_embedding(&[], 5, None, true).await.is_err());
    }

    // === Read / Delete ===

    #[tokio::test]
    async fn get_all_can_strip_embeddings() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        let docs = store.get_all_documents(None, false).await.unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.embedding.is_none()));
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn delete_by_ids_and_filters() {
        let store = seeded(SimilarityFunction::DotProduct).await;
        store
            .delete_documents(
                Some(&["a".to_string(), "b".to_string()]),
                Some(&filters(json!({"lang": "en"}))),
            )
            .await
            .unwrap();
        let remaining: Vec<String> = store
            .get_all_documents(None, false)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(remaining, vec!["b".to_string(), "c".to_string()]);

        store.delete_documents(None, None).await.unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 0);
    }
}
