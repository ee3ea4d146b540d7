//! Face embedding extractor via ONNX Runtime.
//!
//! Turns a face crop into a 512-dimensional embedding with a FaceNet-style
//! model that takes a 160x160 NHWC input.

use crate::model::{self, ModelError};
use crate::preprocess::{self, ModelVariant};
use crate::types::{Embedding, EMBEDDING_DIM};
use image::RgbImage;
use ort::session::Session;
use std::path::Path;
use thiserror::Error;

pub const EMBEDDER_INPUT_SIZE: u32 = 160;
const EMBEDDER_MODEL_VERSION: &str = "facenet512";

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("face crop is empty")]
    EmptyImage,
    #[error("expected {expected}-dim embedding, got {0}", expected = EMBEDDING_DIM)]
    UnexpectedLength(usize),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Anything that turns a face crop into an embedding.
///
/// Inference takes `&mut self`: the native session is not reentrant, so
/// callers hold exclusive access for the duration of one pass.
pub trait EmbeddingModel: Send {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractionError>;
}

/// ONNX-backed face embedder.
pub struct FaceEmbedder {
    session: Session,
    variant: ModelVariant,
}

impl FaceEmbedder {
    /// Load the embedding model from the given path.
    pub fn load(model_path: &Path, variant: ModelVariant) -> Result<Self, ModelError> {
        let session = model::load_session(model_path, "face-embedding")?;
        tracing::info!(?variant, input = EMBEDDER_INPUT_SIZE, "face embedder ready");
        Ok(Self { session, variant })
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }
}

impl EmbeddingModel for FaceEmbedder {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractionError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ExtractionError::EmptyImage);
        }

        let input = preprocess::to_input_tensor(face, EMBEDDER_INPUT_SIZE, self.variant);
        let raw = model::run_first_output(&mut self.session, &input)?;

        if raw.len() != EMBEDDING_DIM {
            return Err(ExtractionError::UnexpectedLength(raw.len()));
        }

        Ok(Embedding {
            values: raw,
            model_version: Some(EMBEDDER_MODEL_VERSION.to_string()),
        })
    }
}

impl<M: EmbeddingModel + ?Sized> EmbeddingModel for Box<M> {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractionError> {
        (**self).extract(face)
    }
}
