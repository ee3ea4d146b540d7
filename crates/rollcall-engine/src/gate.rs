//! Engine-wide single-permit inference gate.
//!
//! Live frames try the gate without waiting and are dropped when it is
//! held; capture and gallery requests wait for it. Either way at most one
//! recognition pass is in flight.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held for the duration of one recognition pass.
pub type GatePermit = OwnedSemaphorePermit;

#[derive(Debug)]
pub struct InferenceGate {
    semaphore: Arc<Semaphore>,
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceGate {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the permit if it is free. Never waits.
    pub fn try_enter(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Wait for the permit. Returns `None` only if the gate was closed.
    pub async fn enter(&self) -> Option<GatePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}
