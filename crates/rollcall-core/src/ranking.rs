//! Candidate ranking: score a probe against every registered face and rank.

use crate::embedder::{EmbeddingModel, ExtractionError};
use crate::similarity;
use crate::types::{Embedding, ProcessedImage, RecognitionResult, RegisteredFace};

/// Strategy for scoring a probe embedding against the registry.
pub trait Matcher {
    /// Score every registry entry and return results ranked by descending
    /// similarity. Ties keep registry order.
    fn rank(
        &self,
        probe: &Embedding,
        registry: &[RegisteredFace],
        threshold: f32,
    ) -> Vec<RecognitionResult>;
}

/// Cosine similarity matcher.
///
/// Entries that cannot be scored (wrong length, zero norm) are skipped with
/// a warning: they are stale registry data, not a reason to fail the pass.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn rank(
        &self,
        probe: &Embedding,
        registry: &[RegisteredFace],
        threshold: f32,
    ) -> Vec<RecognitionResult> {
        let mut results: Vec<RecognitionResult> = registry
            .iter()
            .filter_map(|face| match probe.similarity(&face.embedding) {
                Ok(sim) => Some(RecognitionResult {
                    person_id: face.person_id.clone(),
                    similarity: sim,
                    matches_criteria: similarity::meets_threshold(sim, threshold),
                }),
                Err(e) => {
                    tracing::warn!(person_id = %face.person_id, error = %e, "skipping unscorable registry entry");
                    None
                }
            })
            .collect();

        // sort_by is stable, so equal scores stay in registry order.
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results
    }
}

/// Extract the probe embedding from `image` and rank it against `registry`.
///
/// Returns an empty list without touching the model when the registry is
/// empty or the image has no face crop.
pub fn recognize<E, M>(
    image: &ProcessedImage,
    registry: &[RegisteredFace],
    embedder: &mut E,
    matcher: &M,
    threshold: f32,
) -> Result<Vec<RecognitionResult>, ExtractionError>
where
    E: EmbeddingModel + ?Sized,
    M: Matcher + ?Sized,
{
    if registry.is_empty() {
        return Ok(Vec::new());
    }
    let Some(crop) = image.face_crop() else {
        return Ok(Vec::new());
    };

    let probe = embedder.extract(crop)?;
    let results = matcher.rank(&probe, registry, threshold);
    tracing::debug!(
        registry = registry.len(),
        scored = results.len(),
        best = results.first().map(|r| r.similarity),
        "ranked candidates"
    );
    Ok(results)
}

/// How many ranked results a call site keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Matching results only, at most `n` (live preview).
    TopMatching(usize),
    /// Every matching result (capture/confirm).
    AllMatching,
}

impl Truncation {
    pub fn apply(self, ranked: Vec<RecognitionResult>) -> Vec<RecognitionResult> {
        let matching = ranked.into_iter().filter(|r| r.matches_criteria);
        match self {
            Truncation::TopMatching(n) => matching.take(n).collect(),
            Truncation::AllMatching => matching.collect(),
        }
    }
}

/// Outcome of filtering a ranked list for the confirm flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// At least one result passed the threshold.
    Candidates(Vec<RecognitionResult>),
    /// Nothing was scored at all.
    NoMatches,
    /// Results existed but none passed the threshold.
    BelowThreshold { best: f32 },
}

impl Selection {
    pub fn from_ranked(ranked: Vec<RecognitionResult>) -> Self {
        let Some(best) = ranked.first().map(|r| r.similarity) else {
            return Selection::NoMatches;
        };
        let kept = Truncation::AllMatching.apply(ranked);
        if kept.is_empty() {
            Selection::BelowThreshold { best }
        } else {
            Selection::Candidates(kept)
        }
    }
}
