use crate::detector::DetectedFace;
use crate::similarity::{self, SimilarityError};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Length of every face embedding produced by the embedding model.
pub const EMBEDDING_DIM: usize = 512;

/// Bounding box for a detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face embedding vector (512-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "facenet512").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        similarity::cosine_similarity(&self.values, &other.values)
    }

    /// Euclidean distance. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        similarity::euclidean_distance(&self.values, &other.values)
    }

    /// Little-endian `f32` encoding for BLOB storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// byte length is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self::new(values))
    }
}

/// A registry entry: the single active face embedding of one person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredFace {
    pub person_id: String,
    pub embedding: Embedding,
    /// Opaque reference to the image the embedding was taken from.
    pub image_ref: String,
}

/// One camera frame or gallery photo after face detection.
///
/// The face crop and its bounding box travel together in a
/// [`DetectedFace`], so a crop can never exist without a box.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    original: RgbImage,
    face: Option<DetectedFace>,
    pub person_id: Option<String>,
}

impl ProcessedImage {
    pub fn new(original: RgbImage, face: Option<DetectedFace>) -> Self {
        Self {
            original,
            face,
            person_id: None,
        }
    }

    pub fn without_face(original: RgbImage) -> Self {
        Self::new(original, None)
    }

    pub fn original(&self) -> &RgbImage {
        &self.original
    }

    pub fn face_crop(&self) -> Option<&RgbImage> {
        self.face.as_ref().map(|f| &f.crop)
    }

    pub fn face_bounding_box(&self) -> Option<&BoundingBox> {
        self.face.as_ref().map(|f| &f.bounding_box)
    }

    pub fn has_face(&self) -> bool {
        self.face.is_some()
    }
}

/// Score of one registry entry against one probe image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub person_id: String,
    pub similarity: f32,
    pub matches_criteria: bool,
}

/// Person metadata from a student or volunteer directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: String,
    pub display_name: String,
    pub subtitle: String,
    pub profile_image_url: Option<String>,
}

/// A recognition result enriched with directory metadata, for presentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedPerson {
    pub person_id: String,
    pub display_name: String,
    pub is_student: bool,
    pub similarity: f32,
    pub subtitle: String,
    pub profile_image_url: Option<String>,
}

impl RecognizedPerson {
    pub fn from_record(record: PersonRecord, is_student: bool, similarity: f32) -> Self {
        Self {
            person_id: record.person_id,
            display_name: record.display_name,
            is_student,
            similarity,
            subtitle: record.subtitle,
            profile_image_url: record.profile_image_url,
        }
    }
}

/// Row counts reported by the attendance service for one bulk mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceMarkOutcome {
    pub inserted: u32,
    pub skipped_existing: u32,
}
