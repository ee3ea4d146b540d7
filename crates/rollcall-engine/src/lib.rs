//! rollcall-engine: attendance capture on top of `rollcall-core`.
//!
//! Owns the models on a dedicated engine thread, gates inference to one pass
//! at a time, runs the live camera pipeline and the capture/confirm workflow,
//! and commits attendance through the collaborator traits.

pub mod collaborators;
pub mod commit;
pub mod config;
pub mod engine;
pub mod gate;
pub mod live;
pub mod resolve;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use collaborators::{AttendanceService, CollaboratorError, FaceRegistry, PersonDirectory};
pub use commit::MarkOutcome;
pub use config::Config;
pub use engine::{spawn_engine, spawn_from_config, EngineError, EngineHandle, EngineModels};
pub use gate::InferenceGate;
pub use live::{FrameDisposition, LiveStats};
pub use store::{PersonKind, SqliteDirectory, SqliteStore, StoreError};
pub use workflow::{
    AttendanceWorkflow, CaptureOutcome, CaptureState, Collaborators, RecognitionIssue,
    WorkflowError, WorkflowSettings, WorkflowSnapshot,
};
