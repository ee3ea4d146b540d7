//! Attendance commit protocol.
//!
//! The attendance service performs the idempotency check; this module only
//! interprets its row counts.

use crate::collaborators::AttendanceService;
use chrono::{Local, NaiveDate};
use rollcall_core::AttendanceMarkOutcome;
use serde::Serialize;

/// Date format expected by the attendance service.
pub const ATTENDANCE_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum MarkOutcome {
    /// A new attendance row was written.
    Marked,
    /// The person was already marked present for that date.
    AlreadyMarked,
    /// Anything else, including transport failures.
    Failed(String),
}

impl MarkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MarkOutcome::Marked)
    }
}

impl From<AttendanceMarkOutcome> for MarkOutcome {
    fn from(outcome: AttendanceMarkOutcome) -> Self {
        match outcome {
            AttendanceMarkOutcome { inserted: 1, .. } => MarkOutcome::Marked,
            AttendanceMarkOutcome {
                skipped_existing: 1,
                ..
            } => MarkOutcome::AlreadyMarked,
            AttendanceMarkOutcome {
                inserted,
                skipped_existing,
            } => MarkOutcome::Failed(format!(
                "unexpected attendance outcome: inserted={inserted}, skipped={skipped_existing}"
            )),
        }
    }
}

/// Today's local date, as used when the caller does not pick one.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Mark one person present on `date`.
pub async fn commit_attendance(
    service: &dyn AttendanceService,
    person_id: &str,
    is_student: bool,
    date: NaiveDate,
) -> MarkOutcome {
    let date = date.format(ATTENDANCE_DATE_FORMAT).to_string();
    let ids = [person_id.to_string()];
    match service.mark_bulk(&ids, &date, is_student).await {
        Ok(outcome) => {
            let interpreted = MarkOutcome::from(outcome);
            tracing::info!(
                person_id,
                is_student,
                %date,
                inserted = outcome.inserted,
                skipped = outcome.skipped_existing,
                outcome = ?interpreted,
                "attendance commit"
            );
            interpreted
        }
        Err(e) => {
            tracing::warn!(person_id, %date, error = %e, "attendance commit failed");
            MarkOutcome::Failed(e.to_string())
        }
    }
}
