//! Fakes for the models and collaborators, shared by the unit tests.

use crate::collaborators::{AttendanceService, CollaboratorError, FaceRegistry, PersonDirectory};
use crate::engine::ModelLoader;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rollcall_core::detector::{DetectedFace, DetectionError, FaceDetector};
use rollcall_core::embedder::ExtractionError;
use rollcall_core::model::ModelError;
use rollcall_core::{
    AttendanceMarkOutcome, BoundingBox, Embedding, EmbeddingModel, PersonRecord, RegisteredFace,
    EMBEDDING_DIM,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Unit embedding whose cosine similarity to `embedding_with_similarity(1.0)`
/// is exactly `sim`.
pub fn embedding_with_similarity(sim: f32) -> Embedding {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[0] = sim;
    v[1] = (1.0 - sim * sim).max(0.0).sqrt();
    Embedding::new(v)
}

pub fn registered(person_id: &str, embedding: Embedding) -> RegisteredFace {
    RegisteredFace {
        person_id: person_id.into(),
        embedding,
        image_ref: format!("faces/{person_id}.jpg"),
    }
}

/// A frame that [`MarkerDetector`] reports a face in.
pub fn face_frame() -> RgbImage {
    let mut img = RgbImage::new(32, 32);
    img.put_pixel(0, 0, Rgb([255, 0, 0]));
    img
}

/// A frame with no face.
pub fn empty_frame() -> RgbImage {
    RgbImage::new(32, 32)
}

/// Detects a face iff the top-left pixel is pure red.
pub struct MarkerDetector;

impl FaceDetector for MarkerDetector {
    fn detect(&self, image: &RgbImage) -> Result<Option<DetectedFace>, DetectionError> {
        if image.width() == 0 || image.get_pixel(0, 0) != &Rgb([255, 0, 0]) {
            return Ok(None);
        }
        Ok(Some(DetectedFace {
            crop: image.clone(),
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: image.width() as f32,
                height: image.height() as f32,
                confidence: 0.99,
            },
        }))
    }
}

/// Always fails.
pub struct BrokenDetector;

impl FaceDetector for BrokenDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Option<DetectedFace>, DetectionError> {
        Err(DetectionError::Failed("detector crashed".into()))
    }
}

/// Embedder that returns a fixed embedding, optionally after a delay.
/// Counters are shared between clones.
#[derive(Clone)]
pub struct ScriptedEmbedder {
    embedding: Option<Embedding>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
}

impl ScriptedEmbedder {
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding: Some(embedding),
            delay: Duration::ZERO,
            calls: Arc::default(),
            loads: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            embedding: None,
            ..Self::new(Embedding::new(Vec::new()))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn loader(&self) -> ModelLoader<Box<dyn EmbeddingModel>> {
        let model = self.clone();
        Box::new(move || {
            model.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(model) as Box<dyn EmbeddingModel>)
        })
    }
}

impl EmbeddingModel for ScriptedEmbedder {
    fn extract(&mut self, _face: &RgbImage) -> Result<Embedding, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.embedding
            .clone()
            .ok_or_else(|| ModelError::InferenceFailed("scripted failure".into()).into())
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    faces: Mutex<Vec<RegisteredFace>>,
}

impl MemoryRegistry {
    pub fn with(faces: Vec<RegisteredFace>) -> Self {
        Self {
            faces: Mutex::new(faces),
        }
    }
}

#[async_trait]
impl FaceRegistry for MemoryRegistry {
    async fn list_face_person_ids(&self) -> Result<Vec<String>, CollaboratorError> {
        let faces = self.faces.lock().unwrap();
        Ok(faces.iter().map(|f| f.person_id.clone()).collect())
    }

    async fn embedding_for(
        &self,
        person_id: &str,
    ) -> Result<Option<RegisteredFace>, CollaboratorError> {
        let faces = self.faces.lock().unwrap();
        Ok(faces.iter().find(|f| f.person_id == person_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    records: HashMap<String, PersonRecord>,
    fail: bool,
}

impl MemoryDirectory {
    pub fn with(people: &[(&str, &str)]) -> Self {
        let records = people
            .iter()
            .map(|(id, name)| {
                (
                    id.to_string(),
                    PersonRecord {
                        person_id: id.to_string(),
                        display_name: name.to_string(),
                        subtitle: String::new(),
                        profile_image_url: None,
                    },
                )
            })
            .collect();
        Self {
            records,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            records: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl PersonDirectory for MemoryDirectory {
    async fn lookup(&self, person_id: &str) -> Result<Option<PersonRecord>, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Storage("directory offline".into()));
        }
        Ok(self.records.get(person_id).cloned())
    }
}

type MarkCall = (Vec<String>, String, bool);

/// Attendance service replying with a fixed outcome and recording calls.
pub struct ScriptedAttendance {
    reply: Option<AttendanceMarkOutcome>,
    calls: Mutex<Vec<MarkCall>>,
}

impl ScriptedAttendance {
    pub fn replying(outcome: AttendanceMarkOutcome) -> Self {
        Self {
            reply: Some(outcome),
            calls: Mutex::default(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reply: None,
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<MarkCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttendanceService for ScriptedAttendance {
    async fn mark_bulk(
        &self,
        person_ids: &[String],
        date: &str,
        is_student: bool,
    ) -> Result<AttendanceMarkOutcome, CollaboratorError> {
        self.calls
            .lock()
            .unwrap()
            .push((person_ids.to_vec(), date.to_string(), is_student));
        self.reply
            .ok_or_else(|| CollaboratorError::Transport("connection refused".into()))
    }
}
