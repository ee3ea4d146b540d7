//! Interfaces of the external collaborators the workflow consumes.

use async_trait::async_trait;
use rollcall_core::{AttendanceMarkOutcome, PersonRecord, RegisteredFace};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// Registry of known face embeddings, one per person.
#[async_trait]
pub trait FaceRegistry: Send + Sync {
    async fn list_face_person_ids(&self) -> Result<Vec<String>, CollaboratorError>;

    async fn embedding_for(
        &self,
        person_id: &str,
    ) -> Result<Option<RegisteredFace>, CollaboratorError>;

    /// Every registered face, in registry iteration order.
    ///
    /// The default walks [`list_face_person_ids`](Self::list_face_person_ids)
    /// and skips ids whose embedding disappeared in between.
    async fn snapshot(&self) -> Result<Vec<RegisteredFace>, CollaboratorError> {
        let ids = self.list_face_person_ids().await?;
        let mut faces = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(face) = self.embedding_for(&id).await? {
                faces.push(face);
            }
        }
        Ok(faces)
    }
}

/// Student or volunteer directory.
#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn lookup(&self, person_id: &str) -> Result<Option<PersonRecord>, CollaboratorError>;
}

/// Remote attendance service. Idempotency is enforced on its side.
#[async_trait]
pub trait AttendanceService: Send + Sync {
    async fn mark_bulk(
        &self,
        person_ids: &[String],
        date: &str,
        is_student: bool,
    ) -> Result<AttendanceMarkOutcome, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{embedding_with_similarity, registered};

    struct ShrinkingRegistry;

    #[async_trait]
    impl FaceRegistry for ShrinkingRegistry {
        async fn list_face_person_ids(&self) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["a".into(), "gone".into(), "b".into()])
        }

        async fn embedding_for(
            &self,
            person_id: &str,
        ) -> Result<Option<RegisteredFace>, CollaboratorError> {
            Ok((person_id != "gone").then(|| registered(person_id, embedding_with_similarity(0.5))))
        }
    }

    #[tokio::test]
    async fn test_default_snapshot_keeps_order_and_skips_missing() {
        let faces = ShrinkingRegistry.snapshot().await.unwrap();
        let ids: Vec<_> = faces.iter().map(|f| f.person_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
