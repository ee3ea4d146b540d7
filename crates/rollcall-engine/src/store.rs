//! SQLite-backed registry, person directories and attendance log.

use crate::collaborators::{AttendanceService, CollaboratorError, FaceRegistry, PersonDirectory};
use async_trait::async_trait;
use chrono::Utc;
use rollcall_core::{AttendanceMarkOutcome, Embedding, PersonRecord, RegisteredFace};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    person_id     TEXT PRIMARY KEY,
    embedding     BLOB NOT NULL,
    model_version TEXT,
    image_ref     TEXT NOT NULL DEFAULT '',
    updated_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS people (
    person_id         TEXT NOT NULL,
    kind              TEXT NOT NULL CHECK (kind IN ('student', 'volunteer')),
    display_name      TEXT NOT NULL,
    subtitle          TEXT NOT NULL DEFAULT '',
    profile_image_url TEXT,
    PRIMARY KEY (person_id, kind)
);
CREATE TABLE IF NOT EXISTS attendance (
    person_id  TEXT NOT NULL,
    is_student INTEGER NOT NULL,
    date       TEXT NOT NULL,
    marked_at  TEXT NOT NULL,
    UNIQUE (person_id, date)
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored embedding for {person_id} is corrupt")]
    CorruptEmbedding { person_id: String },
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for CollaboratorError {
    fn from(e: StoreError) -> Self {
        CollaboratorError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonKind {
    Student,
    Volunteer,
}

impl PersonKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonKind::Student => "student",
            PersonKind::Volunteer => "volunteer",
        }
    }
}

impl fmt::Display for PersonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(PersonKind::Student),
            "volunteer" => Ok(PersonKind::Volunteer),
            other => Err(format!("unknown person kind {other:?} (student|volunteer)")),
        }
    }
}

/// Row counts, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub faces: u64,
    pub students: u64,
    pub volunteers: u64,
    pub attendance: u64,
}

/// One SQLite connection shared by every collaborator view.
///
/// Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    /// Insert or replace the face for `face.person_id`.
    pub async fn upsert_face(&self, face: RegisteredFace) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO faces
                     (person_id, embedding, model_version, image_ref, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    face.person_id,
                    face.embedding.to_le_bytes(),
                    face.embedding.model_version,
                    face.image_ref,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            tracing::info!(person_id = %face.person_id, "face stored");
            Ok(())
        })
        .await
    }

    /// Returns whether a face was removed.
    pub async fn remove_face(&self, person_id: &str) -> Result<bool, StoreError> {
        let person_id = person_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM faces WHERE person_id = ?1", [&person_id])?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn upsert_person(
        &self,
        kind: PersonKind,
        record: PersonRecord,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO people
                     (person_id, kind, display_name, subtitle, profile_image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.person_id,
                    kind.as_str(),
                    record.display_name,
                    record.subtitle,
                    record.profile_image_url,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.with_conn(|conn| {
            let count = |sql: &str| {
                conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                    .map(|n| n.max(0) as u64)
            };
            Ok(StoreCounts {
                faces: count("SELECT COUNT(*) FROM faces")?,
                students: count("SELECT COUNT(*) FROM people WHERE kind = 'student'")?,
                volunteers: count("SELECT COUNT(*) FROM people WHERE kind = 'volunteer'")?,
                attendance: count("SELECT COUNT(*) FROM attendance")?,
            })
        })
        .await
    }

    /// Directory view over one kind of person.
    pub fn directory(&self, kind: PersonKind) -> SqliteDirectory {
        SqliteDirectory {
            store: self.clone(),
            kind,
        }
    }
}

#[async_trait]
impl FaceRegistry for SqliteStore {
    async fn list_face_person_ids(&self) -> Result<Vec<String>, CollaboratorError> {
        let ids = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT person_id FROM faces ORDER BY person_id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    async fn embedding_for(
        &self,
        person_id: &str,
    ) -> Result<Option<RegisteredFace>, CollaboratorError> {
        let person_id = person_id.to_string();
        let face = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT embedding, model_version, image_ref FROM faces WHERE person_id = ?1",
                        [&person_id],
                        |row| {
                            Ok((
                                row.get::<_, Vec<u8>>(0)?,
                                row.get::<_, Option<String>>(1)?,
                                row.get::<_, String>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                let Some((blob, model_version, image_ref)) = row else {
                    return Ok(None);
                };
                let mut embedding = Embedding::from_le_bytes(&blob)
                    .ok_or(StoreError::CorruptEmbedding {
                        person_id: person_id.clone(),
                    })?;
                embedding.model_version = model_version;
                Ok(Some(RegisteredFace {
                    person_id,
                    embedding,
                    image_ref,
                }))
            })
            .await?;
        Ok(face)
    }
}

#[async_trait]
impl AttendanceService for SqliteStore {
    async fn mark_bulk(
        &self,
        person_ids: &[String],
        date: &str,
        is_student: bool,
    ) -> Result<AttendanceMarkOutcome, CollaboratorError> {
        let person_ids = person_ids.to_vec();
        let date = date.to_string();
        let outcome = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut outcome = AttendanceMarkOutcome::default();
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO attendance (person_id, is_student, date, marked_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    let marked_at = Utc::now().to_rfc3339();
                    for id in &person_ids {
                        match stmt.execute(params![id, is_student, date, marked_at])? {
                            0 => outcome.skipped_existing += 1,
                            _ => outcome.inserted += 1,
                        }
                    }
                }
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }
}

/// Student or volunteer view of a [`SqliteStore`].
#[derive(Clone)]
pub struct SqliteDirectory {
    store: SqliteStore,
    kind: PersonKind,
}

#[async_trait]
impl PersonDirectory for SqliteDirectory {
    async fn lookup(&self, person_id: &str) -> Result<Option<PersonRecord>, CollaboratorError> {
        let person_id = person_id.to_string();
        let kind = self.kind;
        let record = self
            .store
            .with_conn(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT display_name, subtitle, profile_image_url FROM people
                         WHERE person_id = ?1 AND kind = ?2",
                        params![person_id, kind.as_str()],
                        |row| {
                            Ok(PersonRecord {
                                person_id: person_id.clone(),
                                display_name: row.get(0)?,
                                subtitle: row.get(1)?,
                                profile_image_url: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }
}
