//! Integration tests: Retriever → Embedder → Document store
//!
//! Indexes fixture documents through the passage embedder, then retrieves
//! them with text and image queries against in-memory and LanceDB stores.

use std::sync::Arc;

use mosaic_core::{ContentType, Document, SimilarityFunction};
use mosaic_document_store::{
    DocumentStore, InMemoryDocumentStore, LanceDocumentStore, LanceStoreConfig,
};
use mosaic_retriever::{
    MultiModalRetriever, QueryFilters, RankingMode, RetrieverConfig, RetrieverError,
};
use mosaic_test_utils::fixtures::documents::{city_documents, filters};
use mosaic_test_utils::fixtures::images::solid_png;
use mosaic_test_utils::mock::{MockModelLoader, SENTENCE_384, TEXT_768, VISION_768};
use serde_json::json;

// ============================================================
// Helpers
// ============================================================

fn text_config() -> RetrieverConfig {
    RetrieverConfig::builder()
        .query_embedding_model(TEXT_768)
        .passage_embedding_models([(ContentType::Text, TEXT_768)])
        .devices(vec!["cpu".into()])
        .build()
}

/// Embeds `documents` with the retriever's passage embedder and writes them to its store.
async fn index(retriever: &MultiModalRetriever, documents: Vec<Document>) {
    let embeddings = retriever.embed_documents(&documents).await.unwrap();
    let embedded = documents
        .into_iter()
        .zip(embeddings)
        .map(|(document, embedding)| document.with_embedding(embedding))
        .collect();
    retriever.store().write_documents(embedded).await.unwrap();
}

async fn indexed_retriever(config: RetrieverConfig) -> MultiModalRetriever {
    let store = Arc::new(InMemoryDocumentStore::new(config.similarity_function));
    let retriever = MultiModalRetriever::new(config, store, &MockModelLoader::standard()).unwrap();
    index(&retriever, city_documents()).await;
    retriever
}

fn ids(documents: &[Document]) -> Vec<&str> {
    documents.iter().map(|d| d.id.as_str()).collect()
}

// ============================================================
// Ranking
// ============================================================

#[tokio::test]
async fn capital_of_france_ranks_paris_first() {
    let retriever = indexed_retriever(text_config()).await;
    let results = retriever
        .retrieve("What is the capital of France?", None, Some(3), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "paris");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results.iter().all(|d| (0.0..=1.0).contains(&d.score.unwrap())));
}

#[tokio::test]
async fn retrieve_equals_single_query_batch() {
    let retriever = indexed_retriever(text_config()).await;
    let single = retriever.retrieve("harbour", None, Some(2), Some(false)).await.unwrap();
    let batch = retriever
        .retrieve_batch(&["harbour"], QueryFilters::None, Some(2), Some(1), Some(false))
        .await
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(single, batch[0]);
    assert_eq!(single[0].id, "hamburg");
}

#[tokio::test]
async fn batch_results_follow_query_order() {
    let retriever = indexed_retriever(text_config()).await;
    let queries = ["capital of Italy", "cuisine", "capital of Germany"];
    let results = retriever
        .retrieve_batch(&queries, QueryFilters::None, Some(1), Some(2), None)
        .await
        .unwrap();
    let top: Vec<&str> = results.iter().map(|r| r[0].id.as_str()).collect();
    assert_eq!(top, vec!["rome", "lyon", "berlin"]);
}

#[tokio::test]
async fn local_ranking_scores_with_scaled_cosine() {
    let config = RetrieverConfig {
        ranking: RankingMode::Local { logit_scale: 0.0 },
        ..text_config()
    };
    let retriever = indexed_retriever(config).await;
    let results = retriever.retrieve("capital of France", None, Some(2), None).await.unwrap();
    assert_eq!(results[0].id, "paris");
    assert!(results[0].score.unwrap() <= 1.0 + 1e-6);
}

// ============================================================
// Filters
// ============================================================

#[tokio::test]
async fn single_filter_applies_to_every_query() {
    let retriever = indexed_retriever(text_config()).await;
    let germany = filters(json!({"country": "germany"}));
    let results = retriever
        .retrieve_batch(
            &["capital", "harbour", "cuisine"],
            QueryFilters::Single(germany),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    for list in &results {
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|d| d.meta["country"] == "germany"));
    }
}

#[tokio::test]
async fn per_query_filters_follow_their_query() {
    let retriever = indexed_retriever(text_config()).await;
    let results = retriever
        .retrieve_batch(
            &["capital", "capital"],
            QueryFilters::PerQuery(vec![
                filters(json!({"country": "france"})),
                filters(json!({"country": ["italy", "germany"]})),
            ]),
            None,
            None,
            None,
        )
        .await
        .unwrap();
    let mut first = ids(&results[0]);
    first.sort_unstable();
    assert_eq!(first, vec!["lyon", "paris"]);
    let mut second = ids(&results[1]);
    second.sort_unstable();
    assert_eq!(second, vec!["berlin", "hamburg", "rome"]);
}

#[tokio::test]
async fn filter_count_must_match_query_count() {
    let retriever = indexed_retriever(text_config()).await;
    let err = retriever
        .retrieve_batch(
            &["a", "b"],
            QueryFilters::PerQuery(vec![filters(json!({"x": 1}))]),
            None,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RetrieverError::FilterCountMismatch { filters: 1, queries: 2 }));
    assert!(err.to_string().contains("Number of filters"));
}

// ============================================================
// Embedder sharing
// ============================================================

#[tokio::test]
async fn matching_models_share_one_embedder() {
    let loader = MockModelLoader::standard();
    let store = Arc::new(InMemoryDocumentStore::default());
    let retriever = MultiModalRetriever::new(text_config(), store, &loader).unwrap();
    assert!(retriever.shares_query_embedder());
    assert_eq!(loader.encoder_loads(), 1);
}

#[tokio::test]
async fn different_query_model_gets_its_own_embedder() {
    let loader = MockModelLoader::standard();
    let config = RetrieverConfig {
        query_embedding_model: SENTENCE_384.into(),
        ..text_config()
    };
    let store = Arc::new(InMemoryDocumentStore::default());
    let retriever = MultiModalRetriever::new(config, store, &loader).unwrap();
    assert!(!retriever.shares_query_embedder());
    assert_eq!(loader.encoder_loads(), 2);
    assert_eq!(retriever.query_embedder().output_dims(ContentType::Text), Some(384));
    assert_eq!(retriever.passage_embedder().output_dims(ContentType::Text), Some(768));
}

#[tokio::test]
async fn query_and_passage_embeddings_are_identical_when_shared() {
    let retriever = indexed_retriever(text_config()).await;
    let query = retriever.embed_queries(&["Berlin is the capital of Germany."]).await.unwrap();
    let passage = retriever
        .embed_documents(&[Document::text("Berlin is the capital of Germany.")])
        .await
        .unwrap();
    assert_eq!(query, passage);
}

// ============================================================
// Image queries
// ============================================================

#[tokio::test]
async fn image_query_finds_matching_image() {
    let dir = tempfile::tempdir().unwrap();
    let red = solid_png(dir.path(), "red.png", [255, 0, 0]).unwrap();
    let green = solid_png(dir.path(), "green.png", [0, 255, 0]).unwrap();
    let query = solid_png(dir.path(), "query.png", [250, 10, 0]).unwrap();

    let config = RetrieverConfig::builder()
        .query_type(ContentType::Image)
        .query_embedding_model(VISION_768)
        .passage_embedding_models([(ContentType::Image, VISION_768)])
        .similarity_function(SimilarityFunction::Cosine)
        .devices(vec!["cpu".into()])
        .build();
    let store = Arc::new(InMemoryDocumentStore::new(SimilarityFunction::Cosine));
    let retriever = MultiModalRetriever::new(config, store, &MockModelLoader::standard()).unwrap();
    assert!(retriever.shares_query_embedder());
    index(
        &retriever,
        vec![Document::image(green).with_id("green"), Document::image(red).with_id("red")],
    )
    .await;

    let results = retriever
        .retrieve(query.to_str().unwrap(), None, Some(1), None)
        .await
        .unwrap();
    assert_eq!(ids(&results), vec!["red"]);
}

// ============================================================
// LanceDB store
// ============================================================

#[tokio::test]
async fn retrieval_through_lance_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = LanceDocumentStore::new(LanceStoreConfig::new(dir.path(), 768)).await.unwrap();
    let retriever =
        MultiModalRetriever::new(text_config(), Arc::new(store), &MockModelLoader::standard())
            .unwrap();
    index(&retriever, city_documents()).await;

    assert_eq!(retriever.store().get_document_count(None).await.unwrap(), 5);
    let results = retriever
        .retrieve(
            "What is the capital of France?",
            Some(filters(json!({"country": "france"}))),
            Some(5),
            None,
        )
        .await
        .unwrap();
    assert_eq!(ids(&results), vec!["paris", "lyon"]);
}
