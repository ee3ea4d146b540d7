//! General-purpose image classifier used as an "is this a sensible photo"
//! pre-filter, outside the embedding path.
//!
//! Shares the load and error contract of the face embedder: loaded once by
//! path, 224x224 NHWC input, float or quantized variant by configuration.

use crate::model::{self, ModelError};
use crate::preprocess::{self, ModelVariant};
use image::RgbImage;
use ort::session::Session;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("image is empty")]
    EmptyImage,
    #[error("classifier produced no scores")]
    NoScores,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One class score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub index: usize,
    pub label: Option<String>,
    pub score: f32,
}

pub trait ImageClassifier: Send {
    /// Scores for every class, sorted by descending score.
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Classification>, ClassifierError>;
}

/// ONNX-backed photo classifier with an optional label table.
pub struct PhotoClassifier {
    session: Session,
    variant: ModelVariant,
    labels: Vec<String>,
}

impl PhotoClassifier {
    pub fn load(model_path: &Path, variant: ModelVariant) -> Result<Self, ModelError> {
        let session = model::load_session(model_path, "image-classifier")?;
        Ok(Self {
            session,
            variant,
            labels: Vec::new(),
        })
    }

    /// Attach class labels, one per output index.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Read a label file: one label per line, blank lines skipped.
    pub fn read_labels(path: &Path) -> std::io::Result<Vec<String>> {
        Ok(parse_labels(&std::fs::read_to_string(path)?))
    }
}

impl ImageClassifier for PhotoClassifier {
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Classification>, ClassifierError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ClassifierError::EmptyImage);
        }
        let input = preprocess::to_input_tensor(image, CLASSIFIER_INPUT_SIZE, self.variant);
        let scores = model::run_first_output(&mut self.session, &input)?;
        if scores.is_empty() {
            return Err(ClassifierError::NoScores);
        }
        Ok(rank_scores(&scores, &self.labels))
    }
}

impl<C: ImageClassifier + ?Sized> ImageClassifier for Box<C> {
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Classification>, ClassifierError> {
        (**self).classify(image)
    }
}

fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn rank_scores(scores: &[f32], labels: &[String]) -> Vec<Classification> {
    let mut ranked: Vec<Classification> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| Classification {
            index,
            label: labels.get(index).cloned(),
            score,
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Decides whether a classified photo is plausible input.
///
/// With an accept list, the top label must be in it. Without one, the top
/// score must reach `min_confidence`.
#[derive(Debug, Clone, Default)]
pub struct PhotoFilter {
    pub accept_labels: Vec<String>,
    pub min_confidence: f32,
}

impl PhotoFilter {
    pub fn is_sensible(&self, ranked: &[Classification]) -> bool {
        let Some(top) = ranked.first() else {
            return false;
        };
        if self.accept_labels.is_empty() {
            return top.score >= self.min_confidence;
        }
        top.label
            .as_deref()
            .is_some_and(|l| self.accept_labels.iter().any(|a| a.eq_ignore_ascii_case(l)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_scores_descending_with_labels() {
        let ranked = rank_scores(&[0.1, 0.7, 0.2], &labels(&["cat", "person", "tree"]));
        assert_eq!(ranked[0].index, 1);
        assert_eq!(ranked[0].label.as_deref(), Some("person"));
        assert_eq!(ranked[2].label.as_deref(), Some("cat"));
    }

    #[test]
    fn test_rank_scores_missing_labels() {
        let ranked = rank_scores(&[0.3, 0.9], &labels(&["only-one"]));
        assert_eq!(ranked[0].index, 1);
        assert!(ranked[0].label.is_none());
    }

    #[test]
    fn test_parse_labels_skips_blank_lines() {
        assert_eq!(parse_labels("person\n\n  tree \n"), labels(&["person", "tree"]));
    }

    #[test]
    fn test_filter_by_confidence() {
        let filter = PhotoFilter {
            accept_labels: vec![],
            min_confidence: 0.5,
        };
        assert!(filter.is_sensible(&rank_scores(&[0.2, 0.6], &[])));
        assert!(!filter.is_sensible(&rank_scores(&[0.2, 0.4], &[])));
        assert!(!filter.is_sensible(&[]));
    }

    #[test]
    fn test_filter_by_accept_list() {
        let filter = PhotoFilter {
            accept_labels: labels(&["Person", "face"]),
            min_confidence: 0.0,
        };
        let names = labels(&["person", "tree"]);
        assert!(filter.is_sensible(&rank_scores(&[0.8, 0.1], &names)));
        assert!(!filter.is_sensible(&rank_scores(&[0.1, 0.8], &names)));
        assert!(!filter.is_sensible(&rank_scores(&[0.8, 0.1], &[])));
    }
}
