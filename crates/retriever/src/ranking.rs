//! Scaled cosine ranking over fetched candidates.

use candle_core::{Device, Tensor};
use mosaic_core::Document;
use mosaic_embedding::EmbeddingError;
use mosaic_embedding::ops::scaled_similarity;

use crate::error::RetrieverError;

/// Ranks `candidates` by `exp(logit_scale) * cos(query, embedding)` and keeps the best `top_k`.
///
/// Candidates without an embedding are dropped. Equal scores keep candidate order.
pub fn rank_locally(
    query: &[f32],
    candidates: Vec<Document>,
    logit_scale: f64,
    top_k: usize,
) -> Result<Vec<Document>, RetrieverError> {
    let dims = query.len();
    let mut embedded = Vec::with_capacity(candidates.len());
    let mut matrix = Vec::with_capacity(candidates.len() * dims);
    for document in candidates {
        let Some(embedding) = document.embedding.as_deref() else {
            continue;
        };
        if embedding.len() != dims {
            return Err(RetrieverError::InvalidInput(format!(
                "document '{}' has a {}-dimensional embedding, the query has {dims}",
                document.id,
                embedding.len()
            )));
        }
        matrix.extend_from_slice(embedding);
        embedded.push(document);
    }
    if embedded.is_empty() {
        return Ok(embedded);
    }

    let scores = score(query, matrix, embedded.len(), logit_scale)
        .map_err(|e| EmbeddingError::Inference(format!("local ranking: {e}")))?;
    for (document, score) in embedded.iter_mut().zip(scores) {
        document.score = Some(score);
    }

    embedded.sort_by(|a, b| {
        let (a, b) = (a.score.unwrap_or(f32::MIN), b.score.unwrap_or(f32::MIN));
        b.total_cmp(&a)
    });
    embedded.truncate(top_k);
    Ok(embedded)
}

fn score(
    query: &[f32],
    matrix: Vec<f32>,
    rows: usize,
    logit_scale: f64,
) -> candle_core::Result<Vec<f32>> {
    let query = Tensor::from_slice(query, (1, query.len()), &Device::Cpu)?;
    let candidates = Tensor::from_vec(matrix, (rows, query.dim(1)?), &Device::Cpu)?;
    scaled_similarity(&query, &candidates, logit_scale)?
        .squeeze(0)?
        .to_vec1()
}
