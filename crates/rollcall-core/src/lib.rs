//! rollcall-core: face embedding, similarity scoring and candidate ranking.
//!
//! Extracts fixed-length face embeddings with an ONNX model, scores them
//! against a registry of known faces and ranks the candidates. A second
//! ONNX model classifies whole photos for a plausibility pre-filter.

pub mod classifier;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod model;
pub mod preprocess;
pub mod ranking;
pub mod similarity;
pub mod types;

pub use classifier::{Classification, ImageClassifier, PhotoClassifier, PhotoFilter};
pub use detector::{DetectedFace, FaceDetector, WholeImageDetector};
pub use embedder::{EmbeddingModel, FaceEmbedder};
pub use preprocess::ModelVariant;
pub use ranking::{CosineMatcher, Matcher, Selection, Truncation};
pub use types::{
    AttendanceMarkOutcome, BoundingBox, Embedding, PersonRecord, ProcessedImage,
    RecognitionResult, RecognizedPerson, RegisteredFace, EMBEDDING_DIM,
};
