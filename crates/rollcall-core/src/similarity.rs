//! Cosine similarity and Euclidean distance over fixed-length embeddings.

use crate::types::EMBEDDING_DIM;
use thiserror::Error;

/// Default cosine similarity at or above which a registry entry counts as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.2;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding length mismatch: expected {expected}, got {left} and {right}")]
    DimensionMismatch {
        expected: usize,
        left: usize,
        right: usize,
    },
    #[error("cosine similarity undefined for a zero-norm embedding")]
    ZeroNorm,
}

fn check_dims(a: &[f32], b: &[f32]) -> Result<(), SimilarityError> {
    if a.len() != EMBEDDING_DIM || b.len() != EMBEDDING_DIM {
        return Err(SimilarityError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`, in [-1, 1].
///
/// Both slices must hold exactly [`EMBEDDING_DIM`] values; nothing is
/// truncated or padded.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    check_dims(a, b)?;

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        Ok(dot / denom)
    } else {
        Err(SimilarityError::ZeroNorm)
    }
}

/// Euclidean (L2) distance between two embeddings.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    check_dims(a, b)?;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Whether a similarity score satisfies the match threshold (inclusive).
pub fn meets_threshold(similarity: f32, threshold: f32) -> bool {
    similarity >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    fn ramp() -> Vec<f32> {
        (0..EMBEDDING_DIM).map(|i| (i as f32 * 0.37).sin()).collect()
    }

    #[test]
    fn test_self_similarity_is_one() {
        let e = ramp();
        let sim = cosine_similarity(&e, &e).unwrap();
        assert!((sim - 1.0).abs() < 1e-5, "got {sim}");
    }

    #[test]
    fn test_self_distance_is_zero() {
        let e = ramp();
        assert!(euclidean_distance(&e, &e).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let a = basis(0);
        let b = basis(1);
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);

        let neg: Vec<f32> = a.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&a, &neg).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_scale_invariant() {
        let a = ramp();
        let scaled: Vec<f32> = a.iter().map(|x| x * 4.0).collect();
        assert!((cosine_similarity(&a, &scaled).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_distance_between_basis_vectors() {
        let d = euclidean_distance(&basis(3), &basis(7)).unwrap();
        assert!((d - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let a = ramp();
        let short = &a[..EMBEDDING_DIM - 1];
        assert_eq!(
            cosine_similarity(&a, short),
            Err(SimilarityError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                left: EMBEDDING_DIM,
                right: EMBEDDING_DIM - 1,
            })
        );
        assert!(euclidean_distance(short, &a).is_err());
    }

    #[test]
    fn test_equal_but_wrong_lengths_fail() {
        let a = vec![1.0, 0.0, 0.0];
        assert!(matches!(
            cosine_similarity(&a, &a),
            Err(SimilarityError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_norm_is_an_error() {
        let zero = vec![0.0; EMBEDDING_DIM];
        assert_eq!(
            cosine_similarity(&zero, &basis(0)),
            Err(SimilarityError::ZeroNorm)
        );
        // Distance is still well defined.
        assert!((euclidean_distance(&zero, &basis(0)).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(meets_threshold(0.2, DEFAULT_MATCH_THRESHOLD));
        assert!(meets_threshold(0.9, DEFAULT_MATCH_THRESHOLD));
        assert!(!meets_threshold(0.05, DEFAULT_MATCH_THRESHOLD));
    }
}
