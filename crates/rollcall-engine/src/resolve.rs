//! Resolution of ranked person ids to directory records.

use crate::collaborators::PersonDirectory;
use rollcall_core::{RecognitionResult, RecognizedPerson};

/// Look up each result in the student directory, then the volunteer
/// directory. Ids found in neither are stale registry data and are dropped
/// with a log line. Ranking order is preserved.
pub async fn resolve_candidates(
    results: &[RecognitionResult],
    students: &dyn PersonDirectory,
    volunteers: &dyn PersonDirectory,
) -> Vec<RecognizedPerson> {
    let mut people = Vec::with_capacity(results.len());
    for result in results {
        match lookup(result, students, volunteers).await {
            Some(person) => people.push(person),
            None => tracing::info!(
                person_id = %result.person_id,
                "registered face has no student or volunteer record; dropping"
            ),
        }
    }
    people
}

async fn lookup(
    result: &RecognitionResult,
    students: &dyn PersonDirectory,
    volunteers: &dyn PersonDirectory,
) -> Option<RecognizedPerson> {
    for (directory, is_student) in [(students, true), (volunteers, false)] {
        match directory.lookup(&result.person_id).await {
            Ok(Some(record)) => {
                return Some(RecognizedPerson::from_record(
                    record,
                    is_student,
                    result.similarity,
                ))
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                person_id = %result.person_id,
                is_student,
                error = %e,
                "directory lookup failed"
            ),
        }
    }
    None
}
