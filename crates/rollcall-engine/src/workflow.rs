//! Capture/confirm state machine.
//!
//! `CameraActive -> Captured -> Recognizing -> Selecting -> MarkingAttendance
//! -> (Success | back to Selecting)`. Per-attempt failures never surface as
//! `Err`: they return the workflow to `CameraActive` (or keep it on
//! `Selecting` for commit failures) with a user-facing message. `Err` is
//! reserved for calls made in the wrong state.

use crate::collaborators::{AttendanceService, FaceRegistry, PersonDirectory};
use crate::commit::{self, MarkOutcome};
use crate::config::Config;
use crate::engine::EngineHandle;
use crate::live::LiveCounters;
use crate::resolve::resolve_candidates;
use chrono::NaiveDate;
use rollcall_core::detector::{self, FaceDetector};
use rollcall_core::{gallery, ProcessedImage, RecognizedPerson, Selection};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

pub const ALREADY_MARKED_MESSAGE: &str = "attendance already marked today";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    CameraActive,
    Captured,
    Recognizing,
    Selecting,
    MarkingAttendance,
    Success,
    /// A model asset is missing or corrupt. Persistent.
    Unavailable,
}

/// Why a capture or gallery attempt went back to `CameraActive`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionIssue {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("could not read image")]
    UnreadableImage,
    #[error("no registered faces")]
    NoRegisteredFaces,
    #[error("no matching faces found")]
    NoMatchingFaces,
    #[error("no faces matched the recognition threshold")]
    BelowThreshold,
    #[error("face recognition unavailable: {0}")]
    Unavailable(String),
}

/// Calls made in a state that does not accept them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("workflow busy in state {0:?}")]
    Busy(CaptureState),
    #[error("face recognition unavailable: {0}")]
    Unavailable(String),
    #[error("{0} is not among the recognized candidates")]
    UnknownCandidate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Ranked candidates are now on the selection surface.
    Candidates(Vec<RecognizedPerson>),
    /// Back on `CameraActive` with this message.
    Rejected(RecognitionIssue),
    /// The capture was discarded while it was being processed.
    Abandoned,
}

/// Observable state, republished on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub state: CaptureState,
    pub message: Option<String>,
    pub recognized: Vec<RecognizedPerson>,
    pub live_faces: Vec<RecognizedPerson>,
    pub selection_open: bool,
    pub live_accepting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkflowSettings {
    pub threshold: f32,
    pub live_top_n: usize,
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.similarity_threshold,
            live_top_n: config.live_top_n,
        }
    }
}

/// The external collaborators one workflow talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn FaceDetector>,
    pub registry: Arc<dyn FaceRegistry>,
    pub students: Arc<dyn PersonDirectory>,
    pub volunteers: Arc<dyn PersonDirectory>,
    pub attendance: Arc<dyn AttendanceService>,
}

/// Mutable workflow state. `epoch` changes on every reset so that work
/// started before the reset can tell its result is stale.
pub(crate) struct Session {
    pub(crate) state: CaptureState,
    pub(crate) epoch: u64,
    message: Option<String>,
    pub(crate) last_frame: Option<Arc<ProcessedImage>>,
    captured: Option<Arc<ProcessedImage>>,
    recognized: Vec<RecognizedPerson>,
    pub(crate) live_faces: Vec<RecognizedPerson>,
    selection_open: bool,
    live_accepting: bool,
    unavailable: Option<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: CaptureState::CameraActive,
            epoch: 0,
            message: None,
            last_frame: None,
            captured: None,
            recognized: Vec::new(),
            live_faces: Vec::new(),
            selection_open: false,
            live_accepting: true,
            unavailable: None,
        }
    }

    fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.state,
            message: self.message.clone(),
            recognized: self.recognized.clone(),
            live_faces: self.live_faces.clone(),
            selection_open: self.selection_open,
            live_accepting: self.live_accepting,
        }
    }

    pub(crate) fn accepts_live_frames(&self) -> bool {
        self.state == CaptureState::CameraActive
            && self.live_accepting
            && !self.selection_open
            && self.unavailable.is_none()
    }

    fn ensure_camera_active(&self) -> Result<(), WorkflowError> {
        if let Some(reason) = &self.unavailable {
            return Err(WorkflowError::Unavailable(reason.clone()));
        }
        if self.state != CaptureState::CameraActive {
            return Err(WorkflowError::Busy(self.state));
        }
        Ok(())
    }

    /// Clear every transient field and return to `CameraActive`.
    fn reset(&mut self) {
        self.epoch += 1;
        self.last_frame = None;
        self.captured = None;
        self.recognized.clear();
        self.live_faces.clear();
        self.selection_open = false;
        self.message = None;
        if self.unavailable.is_some() {
            self.state = CaptureState::Unavailable;
            self.live_accepting = false;
        } else {
            self.state = CaptureState::CameraActive;
            self.live_accepting = true;
        }
    }

    pub(crate) fn mark_unavailable(&mut self, reason: String) {
        self.unavailable = Some(reason.clone());
        self.reset();
        self.message = Some(RecognitionIssue::Unavailable(reason).to_string());
    }
}

pub(crate) struct Inner {
    pub(crate) engine: EngineHandle,
    pub(crate) collab: Collaborators,
    pub(crate) settings: WorkflowSettings,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<WorkflowSnapshot>,
    pub(crate) live: LiveCounters,
}

/// Attendance capture workflow over one engine.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct AttendanceWorkflow {
    pub(crate) inner: Arc<Inner>,
}

impl AttendanceWorkflow {
    pub fn new(engine: EngineHandle, collab: Collaborators, settings: WorkflowSettings) -> Self {
        let session = Session::new();
        let (snapshot_tx, _) = watch::channel(session.snapshot());
        Self {
            inner: Arc::new(Inner {
                engine,
                collab,
                settings,
                session: Mutex::new(session),
                snapshot_tx,
                live: LiveCounters::default(),
            }),
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.read(Session::snapshot)
    }

    pub fn state(&self) -> CaptureState {
        self.read(|s| s.state)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        let session = self.inner.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&session)
    }

    /// Whether no reset happened since `epoch` was taken.
    fn is_current(&self, epoch: u64) -> bool {
        self.read(|s| s.epoch == epoch)
    }

    /// Mutate the session and publish the resulting snapshot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.inner.session.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut session);
        self.inner.snapshot_tx.send_replace(session.snapshot());
        result
    }

    /// Recognize the most recently analyzed live frame.
    pub async fn capture_face(&self) -> Result<CaptureOutcome, WorkflowError> {
        let (epoch, frame) = self.update(|s| {
            s.ensure_camera_active()?;
            s.state = CaptureState::Captured;
            s.live_accepting = false;
            s.message = None;
            s.captured = s.last_frame.clone();
            Ok::<_, WorkflowError>((s.epoch, s.captured.clone()))
        })?;

        let Some(frame) = frame.filter(|f| f.has_face()) else {
            tracing::info!("capture: no face in buffered frame");
            return Ok(self.reject(epoch, RecognitionIssue::NoFaceDetected));
        };

        Ok(self.recognize_for_selection(epoch, frame).await)
    }

    /// Recognize a photo picked from the gallery instead of the live camera.
    pub async fn process_image_from_gallery(
        &self,
        bytes: Vec<u8>,
    ) -> Result<CaptureOutcome, WorkflowError> {
        let epoch = self.update(|s| {
            s.ensure_camera_active()?;
            s.state = CaptureState::Captured;
            s.live_accepting = false;
            s.message = None;
            Ok::<_, WorkflowError>(s.epoch)
        })?;

        let face_detector = Arc::clone(&self.inner.collab.detector);
        let processed = tokio::task::spawn_blocking(move || {
            let image = gallery::decode_upright(&bytes).map_err(|e| {
                tracing::warn!(error = %e, "gallery: decode failed");
                RecognitionIssue::UnreadableImage
            })?;
            detector::process_image(image, face_detector.as_ref()).map_err(|e| {
                tracing::warn!(error = %e, "gallery: detection failed");
                RecognitionIssue::NoFaceDetected
            })
        })
        .await;

        let processed = match processed {
            Ok(Ok(p)) if p.has_face() => Arc::new(p),
            Ok(Ok(_)) => return Ok(self.reject(epoch, RecognitionIssue::NoFaceDetected)),
            Ok(Err(issue)) => return Ok(self.reject(epoch, issue)),
            Err(e) => {
                tracing::warn!(error = %e, "gallery: processing task failed");
                return Ok(self.reject(epoch, RecognitionIssue::NoFaceDetected));
            }
        };

        self.update(|s| {
            if s.epoch == epoch {
                s.captured = Some(Arc::clone(&processed));
            }
        });
        Ok(self.recognize_for_selection(epoch, processed).await)
    }

    /// Close the selection surface and go back to the live camera.
    pub fn retake_photo(&self) {
        tracing::debug!("retake requested");
        self.update(Session::reset);
    }

    /// Drop the current capture and its results.
    pub fn discard_capture(&self) {
        tracing::debug!("capture discarded");
        self.update(Session::reset);
    }

    /// Mark a selected candidate present today.
    pub async fn mark_attendance(
        &self,
        person_id: &str,
        is_student: bool,
    ) -> Result<MarkOutcome, WorkflowError> {
        self.mark_attendance_on(person_id, is_student, commit::today())
            .await
    }

    /// Mark a selected candidate present on `date`.
    pub async fn mark_attendance_on(
        &self,
        person_id: &str,
        is_student: bool,
        date: NaiveDate,
    ) -> Result<MarkOutcome, WorkflowError> {
        let epoch = self.update(|s| {
            if let Some(reason) = &s.unavailable {
                return Err(WorkflowError::Unavailable(reason.clone()));
            }
            if s.state != CaptureState::Selecting {
                return Err(WorkflowError::Busy(s.state));
            }
            if !s.recognized.iter().any(|p| p.person_id == person_id) {
                return Err(WorkflowError::UnknownCandidate(person_id.to_string()));
            }
            s.state = CaptureState::MarkingAttendance;
            s.message = None;
            Ok(s.epoch)
        })?;

        let outcome = commit::commit_attendance(
            self.inner.collab.attendance.as_ref(),
            person_id,
            is_student,
            date,
        )
        .await;

        self.update(|s| {
            if s.epoch != epoch {
                return;
            }
            match &outcome {
                MarkOutcome::Marked => {
                    s.state = CaptureState::Success;
                    s.message = Some(format!("attendance marked for {person_id}"));
                }
                MarkOutcome::AlreadyMarked => {
                    s.state = CaptureState::Selecting;
                    s.message = Some(ALREADY_MARKED_MESSAGE.to_string());
                }
                MarkOutcome::Failed(reason) => {
                    s.state = CaptureState::Selecting;
                    s.message = Some(format!("failed to mark attendance: {reason}"));
                }
            }
        });

        if outcome.is_success() {
            self.update(|s| {
                if s.epoch == epoch {
                    let message = s.message.take();
                    s.reset();
                    s.message = message;
                }
            });
        }

        Ok(outcome)
    }

    /// Rank `image` with no cap and move to `Selecting` if anything matches.
    async fn recognize_for_selection(
        &self,
        epoch: u64,
        image: Arc<ProcessedImage>,
    ) -> CaptureOutcome {
        let entered = self.update(|s| {
            if s.epoch != epoch {
                return false;
            }
            s.state = CaptureState::Recognizing;
            true
        });
        if !entered {
            return CaptureOutcome::Abandoned;
        }

        let permit = self.inner.engine.gate().enter().await;
        if !self.is_current(epoch) {
            return CaptureOutcome::Abandoned;
        }

        let registry = match self.inner.collab.registry.snapshot().await {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "registry unavailable");
                Vec::new()
            }
        };
        if registry.is_empty() {
            return self.reject(epoch, RecognitionIssue::NoRegisteredFaces);
        }
        if !self.is_current(epoch) {
            return CaptureOutcome::Abandoned;
        }

        let ranked = self
            .inner
            .engine
            .rank(image, Arc::new(registry), self.inner.settings.threshold)
            .await;
        drop(permit);

        let ranked = match ranked {
            Ok(ranked) => ranked,
            Err(e) if e.is_resource_error() => {
                return self.reject(epoch, RecognitionIssue::Unavailable(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed");
                return self.reject(epoch, RecognitionIssue::NoMatchingFaces);
            }
        };

        let candidates = match Selection::from_ranked(ranked) {
            Selection::Candidates(c) => c,
            Selection::NoMatches => return self.reject(epoch, RecognitionIssue::NoMatchingFaces),
            Selection::BelowThreshold { best } => {
                tracing::info!(
                    best,
                    threshold = self.inner.settings.threshold,
                    "no candidate passed the threshold"
                );
                return self.reject(epoch, RecognitionIssue::BelowThreshold);
            }
        };

        let people = resolve_candidates(
            &candidates,
            self.inner.collab.students.as_ref(),
            self.inner.collab.volunteers.as_ref(),
        )
        .await;
        if people.is_empty() {
            return self.reject(epoch, RecognitionIssue::NoMatchingFaces);
        }

        self.update(|s| {
            if s.epoch != epoch {
                return CaptureOutcome::Abandoned;
            }
            tracing::info!(candidates = people.len(), "selection opened");
            s.state = CaptureState::Selecting;
            s.selection_open = true;
            s.recognized = people.clone();
            CaptureOutcome::Candidates(people)
        })
    }

    /// Return to `CameraActive` with `issue` as the message, unless the
    /// attempt was already abandoned.
    fn reject(&self, epoch: u64, issue: RecognitionIssue) -> CaptureOutcome {
        self.update(|s| {
            if s.epoch != epoch {
                return CaptureOutcome::Abandoned;
            }
            match &issue {
                RecognitionIssue::Unavailable(reason) => s.mark_unavailable(reason.clone()),
                _ => {
                    s.reset();
                    s.message = Some(issue.to_string());
                }
            }
            CaptureOutcome::Rejected(issue)
        })
    }
}
