//! Document store backed by `LanceDB`.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use mosaic_core::{Content, Document, Filters, Meta, SimilarityFunction};

use crate::config::LanceStoreConfig;
use crate::error::DocumentStoreError;
use crate::store::{DocumentStore, dedup_by_id, passes, rank};

fn storage(e: impl std::fmt::Display) -> DocumentStoreError {
    DocumentStoreError::Storage(e.to_string())
}

fn schema(dims: i32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("content_type", DataType::Utf8, false),
        Field::new("meta", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dims),
            false,
        ),
    ]))
}

fn quote_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    ids.into_iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a StringArray, DocumentStoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| DocumentStoreError::Storage(format!("missing {name} column")))
}

/// Persists embedded documents in a Lance table.
///
/// Every document must carry an embedding of the configured width.
pub struct LanceDocumentStore {
    table: lancedb::Table,
    dims: i32,
    similarity: SimilarityFunction,
}

impl LanceDocumentStore {
    /// Opens the configured table, creating it when absent.
    pub async fn new(config: LanceStoreConfig) -> Result<Self, DocumentStoreError> {
        let dims = i32::try_from(config.embedding_dim)
            .map_err(|e| DocumentStoreError::InvalidInput(format!("bad dimensions: {e}")))?;
        if dims == 0 {
            return Err(DocumentStoreError::InvalidInput(
                "embedding_dim must be greater than 0".into(),
            ));
        }

        let db = lancedb::connect(config.path.to_string_lossy().as_ref())
            .execute()
            .await
            .map_err(storage)?;

        let existing = db.table_names().execute().await.map_err(storage)?;
        let table = if existing.contains(&config.table) {
            let table = db.open_table(&config.table).execute().await.map_err(storage)?;
            let stored = table.schema().await.map_err(storage)?;
            match stored.field_with_name("vector").map(Field::data_type) {
                Ok(DataType::FixedSizeList(_, width)) if *width == dims => {}
                Ok(DataType::FixedSizeList(_, width)) => {
                    return Err(DocumentStoreError::DimensionMismatch {
                        expected: usize::try_from(*width).unwrap_or_default(),
                        actual: config.embedding_dim,
                    });
                }
                _ => {
                    return Err(DocumentStoreError::Storage(format!(
                        "table {} has no vector column",
                        config.table
                    )));
                }
            }
            table
        } else {
            db.create_empty_table(&config.table, schema(dims))
                .execute()
                .await
                .map_err(storage)?
        };
        tracing::debug!(
            path = %config.path.display(),
            table = %config.table,
            dims,
            "lance store opened"
        );

        Ok(Self {
            table,
            dims,
            similarity: config.similarity,
        })
    }

    fn distance_type(&self) -> DistanceType {
        match self.similarity {
            SimilarityFunction::DotProduct => DistanceType::Dot,
            SimilarityFunction::Cosine => DistanceType::Cosine,
        }
    }

    fn to_batch(&self, documents: &[Document]) -> Result<RecordBatch, DocumentStoreError> {
        let width = usize::try_from(self.dims).unwrap_or_default();
        let mut ids = Vec::with_capacity(documents.len());
        let mut contents = Vec::with_capacity(documents.len());
        let mut content_types = Vec::with_capacity(documents.len());
        let mut metas = Vec::with_capacity(documents.len());
        let mut vectors = Vec::with_capacity(documents.len());

        for document in documents {
            let embedding = document.embedding.as_ref().ok_or_else(|| {
                DocumentStoreError::InvalidInput(format!(
                    "document '{}' has no embedding",
                    document.id
                ))
            })?;
            if embedding.len() != width {
                return Err(DocumentStoreError::DimensionMismatch {
                    expected: width,
                    actual: embedding.len(),
                });
            }
            ids.push(document.id.as_str());
            contents.push(serde_json::to_string(&document.content)?);
            content_types.push(document.content_type.as_str());
            metas.push(serde_json::to_string(&document.meta)?);
            vectors.push(Some(embedding.iter().copied().map(Some).collect::<Vec<_>>()));
        }

        RecordBatch::try_new(
            schema(self.dims),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(content_types)),
                Arc::new(StringArray::from(metas)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                    vectors, self.dims,
                )),
            ],
        )
        .map_err(storage)
    }

    fn from_batches(
        batches: &[RecordBatch],
        return_embedding: bool,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        let mut documents = Vec::new();
        for batch in batches {
            let ids = string_column(batch, "id")?;
            let contents = string_column(batch, "content")?;
            let content_types = string_column(batch, "content_type")?;
            let metas = string_column(batch, "meta")?;
            let vectors = batch
                .column_by_name("vector")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

            for i in 0..batch.num_rows() {
                let content: Content = serde_json::from_str(contents.value(i))?;
                let meta: Meta = serde_json::from_str(metas.value(i))?;
                let embedding = match vectors {
                    Some(list) if return_embedding => Some(
                        list.value(i)
                            .as_any()
                            .downcast_ref::<Float32Array>()
                            .ok_or_else(|| {
                                DocumentStoreError::Storage("vector items are not f32".into())
                            })?
                            .values()
                            .to_vec(),
                    ),
                    _ => None,
                };
                documents.push(Document {
                    id: ids.value(i).to_owned(),
                    content,
                    content_type: content_types.value(i).to_owned(),
                    meta,
                    embedding,
                    score: None,
                });
            }
        }
        Ok(documents)
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<(), DocumentStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let predicate = format!("id IN ({})", quote_ids(ids.iter().map(String::as_str)));
        self.table.delete(&predicate).await.map_err(storage)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for LanceDocumentStore {
    fn similarity(&self) -> SimilarityFunction {
        self.similarity
    }

    async fn write_documents(&self, documents: Vec<Document>) -> Result<(), DocumentStoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        if documents.iter().any(|d| d.id.is_empty()) {
            return Err(DocumentStoreError::InvalidInput(
                "document id must not be empty".into(),
            ));
        }
        let documents = dedup_by_id(documents);
        let batch = self.to_batch(&documents)?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema(self.dims));
        let mut upsert = self.table.merge_insert(&["id"]);
        upsert.when_matched_update_all(None).when_not_matched_insert_all();
        upsert.execute(Box::new(batches)).await.map_err(storage)?;
        tracing::debug!(count = documents.len(), "documents written");
        Ok(())
    }

    async fn query_by_embedding(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filters: Option<&Filters>,
        scale_score: bool,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        let width = usize::try_from(self.dims).unwrap_or_default();
        if query_embedding.len() != width {
            return Err(DocumentStoreError::DimensionMismatch {
                expected: width,
                actual: query_embedding.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Meta is stored as JSON text, so filtered queries are ranked exactly over the matches.
        let candidates = if filters.is_some() {
            self.get_all_documents(filters, true).await?
        } else {
            let count = self.table.count_rows(None).await.map_err(storage)?;
            if count == 0 {
                return Ok(vec![]);
            }
            let batches: Vec<RecordBatch> = self
                .table
                .query()
                .nearest_to(query_embedding.to_vec())
                .map_err(storage)?
                .distance_type(self.distance_type())
                .limit(top_k)
                .execute()
                .await
                .map_err(storage)?
                .try_collect()
                .await
                .map_err(storage)?;
            Self::from_batches(&batches, true)?
        };

        rank(candidates, query_embedding, self.similarity, top_k, scale_score)
    }

    async fn get_all_documents(
        &self,
        filters: Option<&Filters>,
        return_embedding: bool,
    ) -> Result<Vec<Document>, DocumentStoreError> {
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .execute()
            .await
            .map_err(storage)?
            .try_collect()
            .await
            .map_err(storage)?;
        let mut documents = Self::from_batches(&batches, return_embedding)?;
        documents.retain(|d| passes(filters, d));
        Ok(documents)
    }

    async fn get_document_count(
        &self,
        filters: Option<&Filters>,
    ) -> Result<usize, DocumentStoreError> {
        if filters.is_none() {
            return self.table.count_rows(None).await.map_err(storage);
        }
        Ok(self.get_all_documents(filters, false).await?.len())
    }

    async fn delete_documents(
        &self,
        ids: Option<&[String]>,
        filters: Option<&Filters>,
    ) -> Result<(), DocumentStoreError> {
        match (ids, filters) {
            (None, None) => {
                self.table.delete("true").await.map_err(storage)?;
                Ok(())
            }
            (Some(ids), None) => self.delete_ids(ids).await,
            (ids, Some(_)) => {
                let targets: Vec<String> = self
                    .get_all_documents(filters, false)
                    .await?
                    .into_iter()
                    .map(|d| d.id)
                    .filter(|id| ids.is_none_or(|ids| ids.contains(id)))
                    .collect();
                self.delete_ids(&targets).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filters(value: serde_json::Value) -> Filters {
        value.as_object().cloned().unwrap()
    }

    async fn store(dir: &tempfile::TempDir, similarity: SimilarityFunction) -> LanceDocumentStore {
        LanceDocumentStore::new(LanceStoreConfig::new(dir.path(), 3).with_similarity(similarity))
            .await
            .unwrap()
    }

    fn doc(id: &str, embedding: Vec<f32>, source: &str) -> Document {
        Document::text(format!("text {id}"))
            .with_id(id)
            .with_embedding(embedding)
            .with_meta("source", source)
    }

    async fn seeded(dir: &tempfile::TempDir) -> LanceDocumentStore {
        let store = store(dir, SimilarityFunction::DotProduct).await;
        store
            .write_documents(vec![
                doc("a", vec![1.0, 0.0, 0.0], "docs"),
                doc("b", vec![0.0, 1.0, 0.0], "code"),
                doc("c", vec![0.5, 0.5, 0.0], "docs"),
            ])
            .await
            .unwrap();
        store
    }

    // === Construction ===

    #[tokio::test]
    async fn new_creates_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::DotProduct).await;
        assert_eq!(store.get_document_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopening_keeps_documents() {
        let dir = tempfile::tempdir().unwrap();
        drop(seeded(&dir).await);
        let reopened = store(&dir, SimilarityFunction::DotProduct).await;
        assert_eq!(reopened.get_document_count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reopening_with_other_width_fails() {
        let dir = tempfile::tempdir().unwrap();
        drop(seeded(&dir).await);
        let result = LanceDocumentStore::new(LanceStoreConfig::new(dir.path(), 8)).await;
        assert!(matches!(
            result,
            Err(DocumentStoreError::DimensionMismatch { expected: 3, actual: 8 })
        ));
    }

    #[tokio::test]
    async fn zero_width_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LanceDocumentStore::new(LanceStoreConfig::new(dir.path(), 0)).await.is_err());
    }

    // === Write ===

    #[tokio::test]
    async fn write_requires_embeddings_of_store_width() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::DotProduct).await;
        let bare = store.write_documents(vec![Document::text("x")]).await;
        assert!(matches!(bare, Err(DocumentStoreError::InvalidInput(_))));
        let narrow = store
            .write_documents(vec![Document::text("x").with_embedding(vec![1.0])])
            .await;
        assert!(matches!(narrow, Err(DocumentStoreError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn write_replaces_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        store
            .write_documents(vec![doc("a", vec![0.0, 0.0, 9.0], "moved")])
            .await
            .unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 3);
        let moved = store
            .get_all_documents(Some(&filters(json!({"source": "moved"}))), true)
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].embedding, Some(vec![0.0, 0.0, 9.0]));
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_write_keep_the_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::DotProduct).await;
        store
            .write_documents(vec![
                doc("same", vec![1.0, 0.0, 0.0], "first"),
                doc("same", vec![0.0, 1.0, 0.0], "second"),
            ])
            .await
            .unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 1);
        let all = store.get_all_documents(None, true).await.unwrap();
        assert_eq!(all[0].meta["source"], "second");
        assert_eq!(all[0].embedding, Some(vec![0.0, 1.0, 0.0]));
    }

    #[tokio::test]
    async fn failed_write_keeps_existing_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        let result = store
            .write_documents(vec![
                doc("a", vec![0.0, 0.0, 9.0], "moved"),
                doc("bad", vec![1.0], "narrow"),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.get_document_count(None).await.unwrap(), 3);
        let moved = store
            .get_all_documents(Some(&filters(json!({"source": "moved"}))), false)
            .await
            .unwrap();
        assert!(moved.is_empty());
    }

    #[tokio::test]
    async fn write_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::DotProduct).await;
        let result = store
            .write_documents(vec![doc("", vec![1.0, 0.0, 0.0], "x")])
            .await;
        assert!(matches!(result, Err(DocumentStoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn round_trips_content_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::Cosine).await;
        let table = mosaic_core::Table::new(vec!["k".into()], vec![vec!["v".into()]]);
        let original = Document::table(table)
            .with_id("t1")
            .with_meta("name", "sheet")
            .with_embedding(vec![0.1, 0.2, 0.3]);
        store.write_documents(vec![original.clone()]).await.unwrap();
        let all = store.get_all_documents(None, true).await.unwrap();
        assert_eq!(all, vec![original]);
    }

    // === Query ===

    #[tokio::test]
    async fn query_returns_best_first_with_scores() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        let results = store
            .query_by_embedding(&[1.0, 0.0, 0.0], 2, None, false)
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!((results[0].score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_filters_on_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        let results = store
            .query_by_embedding(
                &[0.0, 1.0, 0.0],
                10,
                Some(&filters(json!({"source": "docs"}))),
                true,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|d| d.meta["source"] == "docs"));
    }

    #[tokio::test]
    async fn query_on_empty_store_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::Cosine).await;
        let results = store.query_by_embedding(&[1.0, 0.0, 0.0], 5, None, true).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn query_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        assert!(store.query_by_embedding(&[1.0], 5, None, true).await.is_err());
    }

    // === Delete ===

    #[tokio::test]
    async fn delete_by_ids_with_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, SimilarityFunction::DotProduct).await;
        store
            .write_documents(vec![doc("it's", vec![1.0, 1.0, 1.0], "docs")])
            .await
            .unwrap();
        store.delete_documents(Some(&["it's".to_string()]), None).await.unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_filter_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        store
            .delete_documents(None, Some(&filters(json!({"source": "docs"}))))
            .await
            .unwrap();
        let remaining = store.get_all_documents(None, false).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }

    #[tokio::test]
    async fn delete_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir).await;
        store.delete_documents(None, None).await.unwrap();
        assert_eq!(store.get_document_count(None).await.unwrap(), 0);
    }

    #[test]
    fn quotes_are_escaped_in_id_lists() {
        assert_eq!(quote_ids(["a", "it's"]), "'a', 'it''s'");
    }
}
