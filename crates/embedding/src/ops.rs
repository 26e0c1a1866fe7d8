//! Tensor helpers shared by embedding consumers.

use candle_core::{D, Result as CandleResult, Tensor};

/// L2-normalizes a tensor along the last dimension.
///
/// Each vector is scaled to unit length: `x / ||x||_2`. Zero vectors stay zero.
pub fn l2_normalize(tensor: &Tensor) -> CandleResult<Tensor> {
    let norm_sq = tensor.sqr()?.sum_keepdim(D::Minus1)?;
    let norm = norm_sq.sqrt()?.clamp(1e-12, f64::MAX)?;
    tensor.broadcast_div(&norm)
}

/// Mean-pools token embeddings over the sequence, excluding masked positions.
///
/// - `embeddings`: `[batch, seq_len, hidden]`
/// - `attention_mask`: `[batch, seq_len]`, 1 for real tokens and 0 for padding
pub fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> CandleResult<Tensor> {
    let mask = attention_mask
        .unsqueeze(D::Minus1)?
        .to_dtype(embeddings.dtype())?;
    let summed = embeddings.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    summed.broadcast_div(&counts)
}

/// Scaled cosine similarity between every query and every candidate.
///
/// - `queries`: `[q, dims]`
/// - `candidates`: `[n, dims]`
///
/// Returns `[q, n]` holding `exp(logit_scale) * cos(query, candidate)`.
pub fn scaled_similarity(
    queries: &Tensor,
    candidates: &Tensor,
    logit_scale: f64,
) -> CandleResult<Tensor> {
    let queries = l2_normalize(queries)?;
    let candidates = l2_normalize(candidates)?;
    let logits = queries.matmul(&candidates.t()?)?;
    logits.affine(logit_scale.exp(), 0.0)
}
