//! Live camera pipeline.
//!
//! Frames are best-effort: a frame that arrives while a recognition pass is
//! in flight is dropped rather than queued, and failures only clear the
//! overlay.

use crate::collaborators::CollaboratorError;
use crate::engine::EngineError;
use crate::resolve::resolve_candidates;
use crate::workflow::AttendanceWorkflow;
use image::RgbImage;
use rollcall_core::detector::{self, DetectionError};
use rollcall_core::{ProcessedImage, RecognizedPerson, Truncation};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// What happened to one submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Live analysis is off (capture in progress or selection open).
    Ignored,
    /// Another pass held the inference gate.
    Dropped,
    /// Recognized; `faces` people are now on the overlay.
    Analyzed { faces: usize },
    /// The pass failed and the overlay was cleared.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub frames_ignored: u64,
    pub frames_dropped: u64,
    pub frames_analyzed: u64,
    pub frames_failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct LiveCounters {
    ignored: AtomicU64,
    dropped: AtomicU64,
    analyzed: AtomicU64,
    failed: AtomicU64,
}

impl LiveCounters {
    fn record(&self, disposition: FrameDisposition) {
        let counter = match disposition {
            FrameDisposition::Ignored => &self.ignored,
            FrameDisposition::Dropped => &self.dropped,
            FrameDisposition::Analyzed { .. } => &self.analyzed,
            FrameDisposition::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> LiveStats {
        LiveStats {
            frames_ignored: self.ignored.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_analyzed: self.analyzed.load(Ordering::Relaxed),
            frames_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Error, Debug)]
enum LiveError {
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("registry unavailable: {0}")]
    Registry(#[from] CollaboratorError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl AttendanceWorkflow {
    /// Analyze one camera frame and refresh the live overlay.
    pub async fn analyze_frame(&self, frame: RgbImage) -> FrameDisposition {
        let disposition = self.run_frame(frame).await;
        self.inner.live.record(disposition);
        disposition
    }

    pub fn live_stats(&self) -> LiveStats {
        self.inner.live.stats()
    }

    async fn run_frame(&self, frame: RgbImage) -> FrameDisposition {
        let Some(epoch) = self.read(|s| s.accepts_live_frames().then_some(s.epoch)) else {
            return FrameDisposition::Ignored;
        };

        let Some(permit) = self.inner.engine.gate().try_enter() else {
            tracing::trace!("inference busy; frame dropped");
            return FrameDisposition::Dropped;
        };

        let result = self.live_pass(epoch, frame).await;
        drop(permit);

        match result {
            Ok(faces) => FrameDisposition::Analyzed { faces },
            Err(LiveError::Engine(e)) if e.is_resource_error() => {
                tracing::error!(error = %e, "live recognition unavailable");
                self.update(|s| {
                    if s.epoch == epoch {
                        s.mark_unavailable(e.to_string());
                    }
                });
                FrameDisposition::Failed
            }
            Err(e) => {
                tracing::warn!(error = %e, "live frame failed");
                self.publish_live(epoch, Vec::new());
                FrameDisposition::Failed
            }
        }
    }

    async fn live_pass(&self, epoch: u64, frame: RgbImage) -> Result<usize, LiveError> {
        let face_detector = Arc::clone(&self.inner.collab.detector);
        let processed = tokio::task::spawn_blocking(move || {
            detector::process_image(frame, face_detector.as_ref())
        })
        .await??;
        let processed = Arc::new(processed);
        self.buffer_frame(epoch, Arc::clone(&processed));

        if !processed.has_face() {
            self.publish_live(epoch, Vec::new());
            return Ok(0);
        }

        let registry = self.inner.collab.registry.snapshot().await?;
        let ranked = self
            .inner
            .engine
            .rank(processed, Arc::new(registry), self.inner.settings.threshold)
            .await?;
        let top = Truncation::TopMatching(self.inner.settings.live_top_n).apply(ranked);
        let people = resolve_candidates(
            &top,
            self.inner.collab.students.as_ref(),
            self.inner.collab.volunteers.as_ref(),
        )
        .await;

        let count = people.len();
        self.publish_live(epoch, people);
        Ok(count)
    }

    /// Keep `frame` as the one a capture will recognize.
    fn buffer_frame(&self, epoch: u64, frame: Arc<ProcessedImage>) {
        self.update(|s| {
            if s.epoch == epoch && s.accepts_live_frames() {
                s.last_frame = Some(frame);
            }
        });
    }

    /// Replace the overlay, unless live analysis was switched off meanwhile.
    fn publish_live(&self, epoch: u64, faces: Vec<RecognizedPerson>) {
        self.update(|s| {
            if s.epoch == epoch && s.accepts_live_frames() {
                s.live_faces = faces;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, EngineModels};
    use crate::testing::{
        embedding_with_similarity, empty_frame, face_frame, registered, BrokenDetector,
        MarkerDetector, MemoryDirectory, MemoryRegistry, ScriptedAttendance, ScriptedEmbedder,
    };
    use crate::workflow::{CaptureOutcome, CaptureState, Collaborators, WorkflowSettings};
    use rollcall_core::detector::FaceDetector;
    use rollcall_core::model::ModelError;
    use rollcall_core::RegisteredFace;
    use std::time::Duration;

    fn workflow_with(
        embedder: &ScriptedEmbedder,
        detector: Arc<dyn FaceDetector>,
        registry: Vec<RegisteredFace>,
    ) -> AttendanceWorkflow {
        let models = EngineModels {
            embedder: embedder.loader(),
            classifier: Box::new(|| Err(ModelError::ModelNotFound("unused".into()))),
        };
        let engine = spawn_engine(models, 4, Duration::from_secs(5)).unwrap();
        let collab = Collaborators {
            detector,
            registry: Arc::new(MemoryRegistry::with(registry)),
            students: Arc::new(MemoryDirectory::with(&[("s1", "Sam"), ("s2", "Sue")])),
            volunteers: Arc::new(MemoryDirectory::with(&[("v1", "Vic"), ("v2", "Val")])),
            attendance: Arc::new(ScriptedAttendance::unreachable()),
        };
        AttendanceWorkflow::new(
            engine,
            collab,
            WorkflowSettings {
                threshold: 0.2,
                live_top_n: 3,
            },
        )
    }

    fn five_matches() -> Vec<RegisteredFace> {
        vec![
            registered("s1", embedding_with_similarity(0.9)),
            registered("v1", embedding_with_similarity(0.8)),
            registered("s2", embedding_with_similarity(0.7)),
            registered("v2", embedding_with_similarity(0.6)),
            registered("x", embedding_with_similarity(0.5)),
        ]
    }

    #[tokio::test]
    async fn test_live_overlay_keeps_top_three() {
        let embedder = ScriptedEmbedder::new(embedding_with_similarity(1.0));
        let workflow = workflow_with(&embedder, Arc::new(MarkerDetector), five_matches());

        let disposition = workflow.analyze_frame(face_frame()).await;
        assert_eq!(disposition, FrameDisposition::Analyzed { faces: 3 });

        let snap = workflow.snapshot();
        let ids: Vec<_> = snap.live_faces.iter().map(|p| p.person_id.as_str()).collect();
        assert_eq!(ids, ["s1", "v1", "s2"]);
        assert!(snap.live_faces.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn test_frame_without_face_clears_overlay() {
        let embedder = ScriptedEmbedder::new(embedding_with_similarity(1.0));
        let workflow = workflow_with(&embedder, Arc::new(MarkerDetector), five_matches());

        workflow.analyze_frame(face_frame()).await;
        assert!(!workflow.snapshot().live_faces.is_empty());

        let disposition = workflow.analyze_frame(empty_frame()).await;
        assert_eq!(disposition, FrameDisposition::Analyzed { faces: 0 });
        assert!(workflow.snapshot().live_faces.is_empty());
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_detector_failure_degrades() {
        let embedder = ScriptedEmbedder::new(embedding_with_similarity(1.0));
        let workflow = workflow_with(&embedder, Arc::new(BrokenDetector), five_matches());

        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Failed);
        let snap = workflow.snapshot();
        assert!(snap.live_faces.is_empty());
        assert_eq!(snap.state, CaptureState::CameraActive);
        assert_eq!(workflow.live_stats().frames_failed, 1);
    }

    #[tokio::test]
    async fn test_inference_failure_clears_overlay() {
        let embedder = ScriptedEmbedder::failing();
        let workflow = workflow_with(&embedder, Arc::new(MarkerDetector), five_matches());

        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Failed);
        assert!(workflow.snapshot().live_faces.is_empty());
        assert_eq!(workflow.state(), CaptureState::CameraActive);
    }

    #[tokio::test]
    async fn test_frames_ignored_while_selection_open() {
        let embedder = ScriptedEmbedder::new(embedding_with_similarity(1.0));
        let workflow = workflow_with(&embedder, Arc::new(MarkerDetector), five_matches());

        workflow.analyze_frame(face_frame()).await;
        let outcome = workflow.capture_face().await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Candidates(_)));
        let calls = embedder.calls();

        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Ignored);
        assert_eq!(embedder.calls(), calls);
        assert_eq!(workflow.live_stats().frames_ignored, 1);

        workflow.retake_photo();
        assert!(matches!(
            workflow.analyze_frame(face_frame()).await,
            FrameDisposition::Analyzed { .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_dropped_while_inference_in_flight() {
        let embedder = ScriptedEmbedder::new(embedding_with_similarity(1.0))
            .with_delay(Duration::from_millis(300));
        let workflow = workflow_with(&embedder, Arc::new(MarkerDetector), five_matches());

        let first = {
            let workflow = workflow.clone();
            tokio::spawn(async move { workflow.analyze_frame(face_frame()).await })
        };
        while !workflow.inner.engine.gate().is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Dropped);
        assert!(matches!(first.await.unwrap(), FrameDisposition::Analyzed { .. }));
        assert_eq!(embedder.calls(), 1);

        let stats = workflow.live_stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_analyzed, 1);
    }

    #[tokio::test]
    async fn test_missing_model_stops_live_pipeline() {
        let models = EngineModels {
            embedder: Box::new(|| Err(ModelError::ModelNotFound("facenet512.onnx".into()))),
            classifier: Box::new(|| Err(ModelError::ModelNotFound("unused".into()))),
        };
        let engine = spawn_engine(models, 4, Duration::from_secs(5)).unwrap();
        let collab = Collaborators {
            detector: Arc::new(MarkerDetector),
            registry: Arc::new(MemoryRegistry::with(five_matches())),
            students: Arc::new(MemoryDirectory::default()),
            volunteers: Arc::new(MemoryDirectory::default()),
            attendance: Arc::new(ScriptedAttendance::unreachable()),
        };
        let workflow = AttendanceWorkflow::new(
            engine,
            collab,
            WorkflowSettings {
                threshold: 0.2,
                live_top_n: 3,
            },
        );

        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Failed);
        assert_eq!(workflow.state(), CaptureState::Unavailable);
        assert_eq!(workflow.analyze_frame(face_frame()).await, FrameDisposition::Ignored);
    }
}
