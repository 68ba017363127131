use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Guard against division by zero for a degenerate all-zero vector.
const COSINE_EPS: f32 = 1e-10;

/// Two vectors of different lengths were mixed in one operation.
///
/// Vectors are never truncated or padded to fit; the operation fails instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {got}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub got: usize,
}

/// Face embedding vector. Dimensionality is fixed by the external model
/// (2622 for VGG-Face, 4096 for older VGG variants) and opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine distance `1 − a·b / (‖a‖·‖b‖ + ε)` between two embeddings.
    ///
    /// Range is [0, 2]; lower is more similar. A zero vector on either side
    /// yields 1.0 (maximally dissimilar to everything, never a divide error).
    pub fn cosine_distance(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        if self.values.len() != other.values.len() {
            return Err(DimensionMismatch {
                expected: self.values.len(),
                got: other.values.len(),
            });
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        Ok(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPS))
    }
}
