use rusqlite::{Connection, OptionalExtension, Row};

use crate::classroom;
use crate::db::{count_rows, new_id, now_ts, parse_opt_ts, parse_ts, write_tx};
use crate::error::{is_foreign_key_violation, storage, CoreError, CoreResult};
use crate::identity;
use crate::model::{Essay, EssayWithFeedback, Feedback};
use crate::setup::EssayLimits;

const ESSAY_WITH_FEEDBACK_SELECT: &str = "SELECT
       e.id, e.title, e.content, e.prompt, e.image_url, e.author_id, e.class_id,
       e.scoring_started_at, e.created_at, e.updated_at,
       f.id, f.essay_id, f.content_score, f.language_score, f.organization_score,
       f.total_score, f.feedback, f.created_at, f.updated_at
     FROM essays e
     LEFT JOIN feedback f ON f.essay_id = e.id";

pub(crate) fn essay_from_row(row: &Row<'_>) -> rusqlite::Result<Essay> {
    Ok(Essay {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        prompt: row.get(3)?,
        image_url: row.get(4)?,
        author_id: row.get(5)?,
        class_id: row.get(6)?,
        scoring_started_at: parse_opt_ts(row.get(7)?)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        updated_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

/// Reads feedback columns starting at `at`.
pub(crate) fn feedback_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<Option<Feedback>> {
    let Some(id) = row.get::<_, Option<String>>(at)? else {
        return Ok(None);
    };
    Ok(Some(Feedback {
        id,
        essay_id: row.get(at + 1)?,
        content_score: row.get(at + 2)?,
        language_score: row.get(at + 3)?,
        organization_score: row.get(at + 4)?,
        total_score: row.get(at + 5)?,
        feedback: row.get(at + 6)?,
        created_at: parse_ts(&row.get::<_, String>(at + 7)?)?,
        updated_at: parse_ts(&row.get::<_, String>(at + 8)?)?,
    }))
}

fn essay_with_feedback_from_row(row: &Row<'_>) -> rusqlite::Result<EssayWithFeedback> {
    Ok(EssayWithFeedback::new(essay_from_row(row)?, feedback_from_row(row, 10)?))
}

fn check_text(field: &str, value: &str, max_chars: usize) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(field, format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > max_chars {
        return Err(CoreError::validation(
            field,
            format!("{} must be at most {} characters", field, max_chars),
        ));
    }
    Ok(trimmed.to_string())
}

fn clean_image_url(url: Option<&str>) -> Option<String> {
    url.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub struct NewEssay<'a> {
    pub author_id: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub prompt: &'a str,
    pub image_url: Option<&'a str>,
    pub class_id: Option<&'a str>,
}

pub fn submit_essay(conn: &Connection, new: NewEssay<'_>, limits: &EssayLimits) -> CoreResult<Essay> {
    let title = check_text("title", new.title, limits.max_title_chars)?;
    let content = check_text("content", new.content, limits.max_content_chars)?;
    let prompt = check_text("prompt", new.prompt, limits.max_prompt_chars)?;
    let image_url = clean_image_url(new.image_url);

    identity::get_user(conn, new.author_id)?;
    if let Some(class_id) = new.class_id {
        classroom::get_class(conn, class_id)?;
    }

    let id = new_id();
    let now = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO essays(id, title, content, prompt, image_url, author_id, class_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, title, content, prompt, image_url, new.author_id, new.class_id, now, now],
    ) {
        if is_foreign_key_violation(&e) {
            // Author or class vanished between the check and the insert.
            identity::get_user(conn, new.author_id)?;
            if let Some(class_id) = new.class_id {
                classroom::get_class(conn, class_id)?;
            }
        }
        return Err(storage("insert essay")(e));
    }

    tracing::info!(essay_id = %id, author_id = new.author_id, class_id = ?new.class_id, "essay submitted");
    get_essay(conn, &id)
}

pub fn get_essay(conn: &Connection, essay_id: &str) -> CoreResult<Essay> {
    conn.query_row(
        "SELECT id, title, content, prompt, image_url, author_id, class_id,
                scoring_started_at, created_at, updated_at
         FROM essays WHERE id = ?",
        [essay_id],
        essay_from_row,
    )
    .optional()
    .map_err(storage("load essay"))?
    .ok_or_else(|| CoreError::not_found("essay", essay_id))
}

#[derive(Debug, Default)]
pub struct EssayPatch<'a> {
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub prompt: Option<&'a str>,
    /// `Some(None)` clears the image.
    pub image_url: Option<Option<&'a str>>,
}

/// Edits essay text. Existing feedback is left in place; re-scoring is an
/// explicit `request_feedback(.., rescore = true)`.
pub fn update_essay(
    conn: &Connection,
    essay_id: &str,
    patch: EssayPatch<'_>,
    limits: &EssayLimits,
) -> CoreResult<Essay> {
    let current = get_essay(conn, essay_id)?;
    let title = match patch.title {
        Some(v) => check_text("title", v, limits.max_title_chars)?,
        None => current.title,
    };
    let content = match patch.content {
        Some(v) => check_text("content", v, limits.max_content_chars)?,
        None => current.content,
    };
    let prompt = match patch.prompt {
        Some(v) => check_text("prompt", v, limits.max_prompt_chars)?,
        None => current.prompt,
    };
    let image_url = match patch.image_url {
        Some(v) => clean_image_url(v),
        None => current.image_url,
    };

    let changed = conn
        .execute(
            "UPDATE essays SET title = ?, content = ?, prompt = ?, image_url = ?, updated_at = ?
             WHERE id = ?",
            (&title, &content, &prompt, &image_url, now_ts(), essay_id),
        )
        .map_err(storage("update essay"))?;
    if changed == 0 {
        return Err(CoreError::not_found("essay", essay_id));
    }
    get_essay(conn, essay_id)
}

pub fn get_essay_with_feedback(conn: &Connection, essay_id: &str) -> CoreResult<EssayWithFeedback> {
    conn.query_row(
        &format!("{} WHERE e.id = ?", ESSAY_WITH_FEEDBACK_SELECT),
        [essay_id],
        essay_with_feedback_from_row,
    )
    .optional()
    .map_err(storage("load essay"))?
    .ok_or_else(|| CoreError::not_found("essay", essay_id))
}

fn list_where(conn: &Connection, clause: &str, key: &str) -> CoreResult<Vec<EssayWithFeedback>> {
    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE {} ORDER BY e.created_at DESC, e.id",
            ESSAY_WITH_FEEDBACK_SELECT, clause
        ))
        .map_err(storage("list essays"))?;
    let rows = stmt
        .query_map([key], essay_with_feedback_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(storage("list essays"))?;
    Ok(rows)
}

pub fn list_essays_by_author(conn: &Connection, author_id: &str) -> CoreResult<Vec<EssayWithFeedback>> {
    identity::get_user(conn, author_id)?;
    list_where(conn, "e.author_id = ?", author_id)
}

pub fn list_essays_by_class(conn: &Connection, class_id: &str) -> CoreResult<Vec<EssayWithFeedback>> {
    classroom::get_class(conn, class_id)?;
    list_where(conn, "e.class_id = ?", class_id)
}

/// Deletes the essay's feedback and then the essay, atomically. Returns
/// whether a feedback row went with it.
pub fn delete_essay(conn: &Connection, essay_id: &str) -> CoreResult<bool> {
    let tx = write_tx(conn).map_err(storage("begin essay deletion"))?;

    let exists = count_rows(&tx, "SELECT COUNT(*) FROM essays WHERE id = ?", essay_id)
        .map_err(storage("load essay"))?;
    if exists == 0 {
        return Err(CoreError::not_found("essay", essay_id));
    }

    let cascade = |table: &'static str| {
        move |e: rusqlite::Error| CoreError::CascadeFailure {
            entity: "essay",
            key: essay_id.to_string(),
            table,
            message: e.to_string(),
        }
    };
    let feedback = tx
        .execute("DELETE FROM feedback WHERE essay_id = ?", [essay_id])
        .map_err(cascade("feedback"))?;
    tx.execute("DELETE FROM essays WHERE id = ?", [essay_id])
        .map_err(cascade("essays"))?;
    tx.commit().map_err(cascade("essays"))?;

    tracing::info!(essay_id, feedback_removed = feedback > 0, "essay deleted");
    Ok(feedback > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EssayState, Role};
    use crate::testutil::{count, open_temp, seed_user};

    fn essay<'a>(author_id: &'a str, class_id: Option<&'a str>) -> NewEssay<'a> {
        NewEssay {
            author_id,
            title: "Why tides turn",
            content: "The moon pulls the sea.",
            prompt: "Explain a natural cycle",
            image_url: Some("  "),
            class_id,
        }
    }

    #[test]
    fn submit_validates_required_text() {
        let (conn, _dir) = open_temp();
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let limits = EssayLimits::default();

        for field in ["title", "content", "prompt"] {
            let mut new = essay(&author.id, None);
            match field {
                "title" => new.title = " ",
                "content" => new.content = "",
                _ => new.prompt = "\n",
            }
            let err = submit_essay(&conn, new, &limits).unwrap_err();
            assert!(matches!(err, CoreError::Validation { field: ref f, .. } if f == field));
        }

        let tight = EssayLimits {
            max_title_chars: 3,
            ..EssayLimits::default()
        };
        assert!(matches!(
            submit_essay(&conn, essay(&author.id, None), &tight),
            Err(CoreError::Validation { .. })
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM essays"), 0);
    }

    #[test]
    fn submit_rejects_unknown_class_and_author() {
        let (conn, _dir) = open_temp();
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let limits = EssayLimits::default();
        assert!(matches!(
            submit_essay(&conn, essay(&author.id, Some("missing")), &limits),
            Err(CoreError::NotFound { entity: "class", .. })
        ));
        assert!(matches!(
            submit_essay(&conn, essay("ghost", None), &limits),
            Err(CoreError::NotFound { entity: "user", .. })
        ));
    }

    #[test]
    fn submitted_essay_has_no_feedback() {
        let (conn, _dir) = open_temp();
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let e = submit_essay(&conn, essay(&author.id, None), &EssayLimits::default()).expect("submit");
        assert_eq!(e.image_url, None);

        let view = get_essay_with_feedback(&conn, &e.id).expect("view");
        assert!(view.feedback.is_none());
        assert_eq!(view.state, EssayState::Submitted);
        assert!(get_essay_with_feedback(&conn, "nope").is_err());
    }

    #[test]
    fn update_keeps_untouched_fields() {
        let (conn, _dir) = open_temp();
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let limits = EssayLimits::default();
        let e = submit_essay(&conn, essay(&author.id, None), &limits).expect("submit");

        let updated = update_essay(
            &conn,
            &e.id,
            EssayPatch {
                title: Some("Tides, revisited"),
                image_url: Some(Some("https://img.example/t.png")),
                ..EssayPatch::default()
            },
            &limits,
        )
        .expect("update");
        assert_eq!(updated.title, "Tides, revisited");
        assert_eq!(updated.content, e.content);
        assert_eq!(updated.image_url.as_deref(), Some("https://img.example/t.png"));

        let err = update_essay(
            &conn,
            &e.id,
            EssayPatch {
                content: Some(""),
                ..EssayPatch::default()
            },
            &limits,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn listings_by_author_and_class() {
        let (conn, _dir) = open_temp();
        let teacher = seed_user(&conn, "t@example.com", Role::Teacher);
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let class = classroom::create_class(&conn, &teacher.id, "C", None).expect("class");
        let limits = EssayLimits::default();
        submit_essay(&conn, essay(&author.id, Some(&class.id)), &limits).expect("in class");
        submit_essay(&conn, essay(&author.id, None), &limits).expect("loose");

        assert_eq!(list_essays_by_author(&conn, &author.id).expect("by author").len(), 2);
        assert_eq!(list_essays_by_class(&conn, &class.id).expect("by class").len(), 1);
        assert!(list_essays_by_class(&conn, "nope").is_err());
    }

    #[test]
    fn delete_removes_feedback_with_essay() {
        let (conn, _dir) = open_temp();
        let author = seed_user(&conn, "a@example.com", Role::Student);
        let e = submit_essay(&conn, essay(&author.id, None), &EssayLimits::default()).expect("submit");
        conn.execute(
            "INSERT INTO feedback(id, essay_id, content_score, language_score, organization_score,
                                  total_score, feedback, created_at, updated_at)
             VALUES('f1', ?, 1, 2, 3, 2, 'x', ?, ?)",
            (&e.id, now_ts(), now_ts()),
        )
        .expect("seed feedback");

        assert!(delete_essay(&conn, &e.id).expect("delete"));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM feedback"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM essays"), 0);
        assert!(matches!(delete_essay(&conn, &e.id), Err(CoreError::NotFound { .. })));
    }
}
