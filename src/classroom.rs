//! Classes owned by teachers and the enrollments that join users to them.

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{count_rows, new_id, now_ts, parse_ts, write_tx};
use crate::error::{is_foreign_key_violation, is_unique_violation, storage, CoreError, CoreResult};
use crate::identity;
use crate::model::{Class, ClassMembership, ClassRelation, Enrollment, Role, RosterEntry, User};

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        teacher_id: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?)?,
    })
}

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        class_id: row.get(2)?,
        joined_at: parse_ts(&row.get::<_, String>(3)?)?,
    })
}

/// Role is checked at this boundary rather than in the schema because a
/// user's role can change over time.
pub fn assert_role(user: &User, role: Role) -> CoreResult<()> {
    if user.role != role {
        return Err(CoreError::validation(
            "role",
            format!("user {} is {}, expected {}", user.id, user.role.as_str(), role.as_str()),
        ));
    }
    Ok(())
}

pub fn create_class(
    conn: &Connection,
    teacher_id: &str,
    name: &str,
    description: Option<&str>,
) -> CoreResult<Class> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("name", "name must not be empty"));
    }
    let teacher = identity::get_user(conn, teacher_id)?;
    assert_role(&teacher, Role::Teacher)?;

    let description = description.map(str::trim).filter(|s| !s.is_empty());
    let id = new_id();
    conn.execute(
        "INSERT INTO classes(id, name, description, teacher_id, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, name, description, teacher_id, now_ts()),
    )
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            CoreError::not_found("user", teacher_id)
        } else {
            storage("insert class")(e)
        }
    })?;

    tracing::info!(class_id = %id, teacher_id, "class created");
    get_class(conn, &id)
}

pub fn get_class(conn: &Connection, class_id: &str) -> CoreResult<Class> {
    conn.query_row(
        "SELECT id, name, description, teacher_id, created_at FROM classes WHERE id = ?",
        [class_id],
        class_from_row,
    )
    .optional()
    .map_err(storage("load class"))?
    .ok_or_else(|| CoreError::not_found("class", class_id))
}

fn find_enrollment(conn: &Connection, user_id: &str, class_id: &str) -> CoreResult<Option<Enrollment>> {
    conn.query_row(
        "SELECT id, user_id, class_id, joined_at FROM students WHERE user_id = ? AND class_id = ?",
        (user_id, class_id),
        enrollment_from_row,
    )
    .optional()
    .map_err(storage("load enrollment"))
}

/// Idempotent: enrolling twice returns the first enrollment. A concurrent
/// insert that loses the race on the unique pair re-reads the winner's row.
pub fn enroll(conn: &Connection, user_id: &str, class_id: &str) -> CoreResult<Enrollment> {
    if let Some(existing) = find_enrollment(conn, user_id, class_id)? {
        tracing::debug!(user_id, class_id, "already enrolled");
        return Ok(existing);
    }

    let id = new_id();
    let joined_at = now_ts();
    match conn.execute(
        "INSERT INTO students(id, user_id, class_id, joined_at) VALUES(?, ?, ?, ?)",
        (&id, user_id, class_id, &joined_at),
    ) {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(user_id, class_id, "enrollment raced, returning existing row");
            return find_enrollment(conn, user_id, class_id)?
                .ok_or_else(|| CoreError::conflict("enrollment", "students.user_class", class_id));
        }
        Err(e) if is_foreign_key_violation(&e) => {
            // Tell the caller which side is missing.
            identity::get_user(conn, user_id)?;
            get_class(conn, class_id)?;
            return Err(storage("insert enrollment")(e));
        }
        Err(e) => return Err(storage("insert enrollment")(e)),
    }

    tracing::info!(user_id, class_id, "enrolled");
    Ok(Enrollment {
        id,
        user_id: user_id.to_string(),
        class_id: class_id.to_string(),
        joined_at: parse_ts(&joined_at).map_err(storage("insert enrollment"))?,
    })
}

/// Missing enrollments are a no-op; returns whether a row was removed.
pub fn unenroll(conn: &Connection, user_id: &str, class_id: &str) -> CoreResult<bool> {
    let removed = conn
        .execute(
            "DELETE FROM students WHERE user_id = ? AND class_id = ?",
            (user_id, class_id),
        )
        .map_err(storage("delete enrollment"))?;
    if removed == 0 {
        tracing::debug!(user_id, class_id, "unenroll without enrollment");
    }
    Ok(removed > 0)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDeletion {
    pub enrollments: usize,
    pub essays_detached: usize,
}

/// Deletes a class and its enrollments. Essays filed under the class survive
/// with their class cleared; this is the opposite of deleting the teacher,
/// which takes the class's essays with it.
pub fn delete_class(conn: &Connection, class_id: &str) -> CoreResult<ClassDeletion> {
    let tx = write_tx(conn).map_err(storage("begin class deletion"))?;

    let exists = count_rows(&tx, "SELECT COUNT(*) FROM classes WHERE id = ?", class_id)
        .map_err(storage("load class"))?;
    if exists == 0 {
        return Err(CoreError::not_found("class", class_id));
    }

    let step = |table: &'static str, sql: &str| -> CoreResult<usize> {
        tx.execute(sql, [class_id])
            .map_err(|e| CoreError::CascadeFailure {
                entity: "class",
                key: class_id.to_string(),
                table,
                message: e.to_string(),
            })
    };

    let enrollments = step("students", "DELETE FROM students WHERE class_id = ?")?;
    let essays_detached = step(
        "essays",
        "UPDATE essays SET class_id = NULL WHERE class_id = ?",
    )?;
    step("classes", "DELETE FROM classes WHERE id = ?")?;

    tx.commit().map_err(|e| CoreError::CascadeFailure {
        entity: "class",
        key: class_id.to_string(),
        table: "classes",
        message: e.to_string(),
    })?;

    let summary = ClassDeletion {
        enrollments,
        essays_detached,
    };
    tracing::info!(class_id, ?summary, "class deleted");
    Ok(summary)
}

pub fn list_roster_for(conn: &Connection, class_id: &str) -> CoreResult<Vec<RosterEntry>> {
    get_class(conn, class_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.user_id, s.class_id, s.joined_at, u.name, u.email
             FROM students s
             JOIN users u ON u.id = s.user_id
             WHERE s.class_id = ?
             ORDER BY s.joined_at, u.email",
        )
        .map_err(storage("list roster"))?;
    let rows = stmt
        .query_map([class_id], |row| {
            Ok(RosterEntry {
                enrollment: enrollment_from_row(row)?,
                name: row.get(4)?,
                email: row.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(storage("list roster"))?;
    Ok(rows)
}

/// Classes the user teaches followed by classes they are enrolled in.
pub fn list_classes_for(conn: &Connection, user_id: &str) -> CoreResult<Vec<ClassMembership>> {
    identity::get_user(conn, user_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.description, c.teacher_id, c.created_at, 'teacher' AS relation
             FROM classes c
             WHERE c.teacher_id = ?1
             UNION ALL
             SELECT c.id, c.name, c.description, c.teacher_id, c.created_at, 'student' AS relation
             FROM classes c
             JOIN students s ON s.class_id = c.id
             WHERE s.user_id = ?1
             ORDER BY relation DESC, name",
        )
        .map_err(storage("list classes"))?;
    let rows = stmt
        .query_map([user_id], |row| {
            let relation: String = row.get(5)?;
            Ok(ClassMembership {
                class: class_from_row(row)?,
                relation: if relation == "teacher" {
                    ClassRelation::Teacher
                } else {
                    ClassRelation::Student
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(storage("list classes"))?;
    Ok(rows)
}
