//! Similarity functions and score scaling for embedding comparison.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a query embedding is compared with a stored embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityFunction {
    #[default]
    DotProduct,
    Cosine,
}

impl SimilarityFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DotProduct => "dot_product",
            Self::Cosine => "cosine",
        }
    }

    /// Computes the raw similarity between two vectors of equal length.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Self::DotProduct => dot(query, candidate),
            Self::Cosine => {
                let norms = norm(query) * norm(candidate);
                if norms > 0.0 {
                    dot(query, candidate) / norms
                } else {
                    0.0
                }
            }
        }
    }

    /// Maps a raw score into `[0, 1]`, where 1 means most relevant.
    ///
    /// Cosine scores are shifted from `[-1, 1]`; unbounded dot products are
    /// squashed with a sigmoid scaled by 100.
    pub fn scale_to_unit_interval(self, score: f32) -> f32 {
        match self {
            Self::Cosine => (score + 1.0) / 2.0,
            Self::DotProduct => 1.0 / (1.0 + (-score / 100.0).exp()),
        }
    }
}

impl fmt::Display for SimilarityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dot_product" => Ok(Self::DotProduct),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!(
                "unknown similarity function '{other}', expected one of: dot_product, cosine"
            )),
        }
    }
}

/// Dot product of two vectors. Extra trailing elements of the longer one are ignored.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm of a vector.
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns a copy of `v` scaled to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n > 0.0 {
        v.iter().map(|x| x / n).collect()
    } else {
        v.to_vec()
    }
}
