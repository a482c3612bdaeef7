//! Scoring requests and the one-feedback-per-essay upsert.

use rusqlite::{Connection, OptionalExtension};

use crate::db::{new_id, now_ts, write_tx};
use crate::error::{is_foreign_key_violation, is_unique_violation, storage, CoreError, CoreResult};
use crate::essays::{self, feedback_from_row};
use crate::model::Feedback;
use crate::scoring::{ScoreBounds, ScoredFeedback, Scorer};

pub fn get_feedback(conn: &Connection, essay_id: &str) -> CoreResult<Option<Feedback>> {
    conn.query_row(
        "SELECT id, essay_id, content_score, language_score, organization_score, total_score,
                feedback, created_at, updated_at
         FROM feedback WHERE essay_id = ?",
        [essay_id],
        |row| feedback_from_row(row, 0),
    )
    .optional()
    .map(Option::flatten)
    .map_err(storage("load feedback"))
}

/// Insert-or-overwrite keyed on `essay_id` in one statement, so concurrent
/// writers for the same essay never race two inserts.
fn upsert_feedback(conn: &Connection, essay_id: &str, scored: &ScoredFeedback) -> rusqlite::Result<()> {
    let now = now_ts();
    let res = conn.execute(
        "INSERT INTO feedback(
            id, essay_id, content_score, language_score, organization_score, total_score,
            feedback, created_at, updated_at
         ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(essay_id) DO UPDATE SET
            content_score = excluded.content_score,
            language_score = excluded.language_score,
            organization_score = excluded.organization_score,
            total_score = excluded.total_score,
            feedback = excluded.feedback,
            updated_at = excluded.updated_at",
        rusqlite::params![
            new_id(),
            essay_id,
            scored.content_score(),
            scored.language_score(),
            scored.organization_score(),
            scored.total_score(),
            scored.feedback(),
            now,
        ],
    );
    match res {
        Ok(_) => Ok(()),
        // Any other uniqueness failure still lands as an update of the
        // existing row.
        Err(e) if is_unique_violation(&e) => {
            conn.execute(
                "UPDATE feedback SET content_score = ?, language_score = ?, organization_score = ?,
                        total_score = ?, feedback = ?, updated_at = ?
                 WHERE essay_id = ?",
                rusqlite::params![
                    scored.content_score(),
                    scored.language_score(),
                    scored.organization_score(),
                    scored.total_score(),
                    scored.feedback(),
                    now,
                    essay_id,
                ],
            )?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn clear_pending(conn: &Connection, essay_id: &str, marker: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE essays SET scoring_started_at = NULL WHERE id = ? AND scoring_started_at = ?",
        (essay_id, marker),
    )
}

/// Scores an essay and stores the result as its single feedback row.
///
/// Without `rescore`, an essay that already has feedback gets it back and the
/// scorer is not called. Otherwise the scorer runs exactly once, outside any
/// transaction; a failure leaves the essay without new feedback and is
/// retryable by calling again.
pub fn request_feedback(
    conn: &Connection,
    essay_id: &str,
    rescore: bool,
    scorer: &dyn Scorer,
    bounds: ScoreBounds,
) -> CoreResult<Feedback> {
    let current = essays::get_essay_with_feedback(conn, essay_id)?;
    if let (Some(existing), false) = (current.feedback, rescore) {
        tracing::debug!(essay_id, "feedback already present");
        return Ok(existing);
    }
    let essay = current.essay;

    // Submitted -> FeedbackPending
    let marker = now_ts();
    let marked = conn
        .execute(
            "UPDATE essays SET scoring_started_at = ? WHERE id = ?",
            (&marker, essay_id),
        )
        .map_err(storage("mark scoring started"))?;
    if marked == 0 {
        return Err(CoreError::not_found("essay", essay_id));
    }

    let scored = scorer
        .score(&essay.content, &essay.prompt)
        .and_then(|raw| ScoredFeedback::new(raw, bounds));
    let scored = match scored {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(essay_id, error = %e, "scoring failed");
            clear_pending(conn, essay_id, &marker).map_err(storage("clear scoring marker"))?;
            return Err(CoreError::ScoringFailure(e.to_string()));
        }
    };

    // FeedbackPending -> FeedbackReady
    let tx = write_tx(conn).map_err(storage("begin feedback write"))?;
    if let Err(e) = upsert_feedback(&tx, essay_id, &scored) {
        if is_foreign_key_violation(&e) {
            return Err(CoreError::not_found("essay", essay_id));
        }
        return Err(storage("upsert feedback")(e));
    }
    clear_pending(&tx, essay_id, &marker).map_err(storage("clear scoring marker"))?;
    tx.commit().map_err(storage("commit feedback"))?;

    tracing::info!(
        essay_id,
        total_score = scored.total_score(),
        rescore,
        "feedback stored"
    );
    get_feedback(conn, essay_id)?.ok_or_else(|| CoreError::not_found("feedback", essay_id))
}
