//! Users, linked provider accounts, sessions and verification tokens.
//!
//! Token issuance and password hashing happen in the authentication layer;
//! this module only persists what it is handed and enforces uniqueness.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::{count_rows, new_id, now_ts, parse_opt_ts, parse_ts, ts, write_tx};
use crate::error::{
    is_foreign_key_violation, is_unique_violation, storage, violated_columns, CoreError, CoreResult,
};
use crate::model::{Account, AccountTokens, Role, Session, User, VerificationToken};

const USER_COLUMNS: &str =
    "id, name, email, email_verified, image, hashed_password, role, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(6)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        email_verified: parse_opt_ts(row.get(3)?)?,
        image: row.get(4)?,
        hashed_password: row.get(5)?,
        role: Role::parse(&role).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown role {:?}", role).into(),
            )
        })?,
        created_at: parse_ts(&row.get::<_, String>(7)?)?,
        updated_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        provider: row.get(3)?,
        provider_account_id: row.get(4)?,
        tokens: AccountTokens {
            refresh_token: row.get(5)?,
            access_token: row.get(6)?,
            expires_at: row.get(7)?,
            token_type: row.get(8)?,
            scope: row.get(9)?,
            id_token: row.get(10)?,
            session_state: row.get(11)?,
        },
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        session_token: row.get(1)?,
        user_id: row.get(2)?,
        expires: parse_ts(&row.get::<_, String>(3)?)?,
    })
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn require_non_empty(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, format!("{} must not be empty", field)));
    }
    Ok(())
}

pub fn create_user(
    conn: &Connection,
    email: &str,
    name: Option<&str>,
    hashed_password: Option<&str>,
    role: Role,
) -> CoreResult<User> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        return Err(CoreError::validation("email", "email must be an address"));
    }
    let name = name.map(str::trim).filter(|s| !s.is_empty());

    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO users(id, name, email, hashed_password, role, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, name, &email, hashed_password, role.as_str(), &now, &now),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::conflict("user", "users.email", email.clone())
        } else {
            storage("insert user")(e)
        }
    })?;

    tracing::info!(user_id = %id, role = role.as_str(), "user created");
    get_user(conn, &id)
}

pub fn get_user(conn: &Connection, user_id: &str) -> CoreResult<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()
    .map_err(storage("load user"))?
    .ok_or_else(|| CoreError::not_found("user", user_id))
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> CoreResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS),
        [normalize_email(email)],
        user_from_row,
    )
    .optional()
    .map_err(storage("load user by email"))
}

pub fn get_user_by_account(
    conn: &Connection,
    provider: &str,
    provider_account_id: &str,
) -> CoreResult<Option<User>> {
    conn.query_row(
        "SELECT u.id, u.name, u.email, u.email_verified, u.image, u.hashed_password, u.role,
                u.created_at, u.updated_at
         FROM accounts a
         JOIN users u ON u.id = a.user_id
         WHERE a.provider = ? AND a.provider_account_id = ?",
        (provider, provider_account_id),
        user_from_row,
    )
    .optional()
    .map_err(storage("load user by account"))
}

pub fn set_role(conn: &Connection, user_id: &str, role: Role) -> CoreResult<User> {
    let changed = conn
        .execute(
            "UPDATE users SET role = ?, updated_at = ? WHERE id = ?",
            (role.as_str(), now_ts(), user_id),
        )
        .map_err(storage("update user role"))?;
    if changed == 0 {
        return Err(CoreError::not_found("user", user_id));
    }
    get_user(conn, user_id)
}

pub fn mark_email_verified(conn: &Connection, user_id: &str, at: DateTime<Utc>) -> CoreResult<User> {
    let changed = conn
        .execute(
            "UPDATE users SET email_verified = ?, updated_at = ? WHERE id = ?",
            (ts(at), now_ts(), user_id),
        )
        .map_err(storage("mark email verified"))?;
    if changed == 0 {
        return Err(CoreError::not_found("user", user_id));
    }
    get_user(conn, user_id)
}

pub struct NewAccount<'a> {
    pub kind: &'a str,
    pub provider: &'a str,
    pub provider_account_id: &'a str,
    pub tokens: AccountTokens,
}

/// Links a provider identity to a user. A pair that is already linked, to this
/// user or any other, is a conflict: re-linking must go through unlink first.
pub fn link_account(conn: &Connection, user_id: &str, account: NewAccount<'_>) -> CoreResult<Account> {
    require_non_empty("provider", account.provider)?;
    require_non_empty("providerAccountId", account.provider_account_id)?;
    require_non_empty("type", account.kind)?;

    let id = new_id();
    let t = &account.tokens;
    conn.execute(
        "INSERT INTO accounts(
            id, user_id, type, provider, provider_account_id, refresh_token, access_token,
            expires_at, token_type, scope, id_token, session_state
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            user_id,
            account.kind,
            account.provider,
            account.provider_account_id,
            t.refresh_token,
            t.access_token,
            t.expires_at,
            t.token_type,
            t.scope,
            t.id_token,
            t.session_state,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::conflict(
                "account",
                "accounts.provider_account",
                format!("{}:{}", account.provider, account.provider_account_id),
            )
        } else if is_foreign_key_violation(&e) {
            CoreError::not_found("user", user_id)
        } else {
            storage("insert account")(e)
        }
    })?;

    tracing::info!(user_id, provider = account.provider, "account linked");
    Ok(Account {
        id,
        user_id: user_id.to_string(),
        kind: account.kind.to_string(),
        provider: account.provider.to_string(),
        provider_account_id: account.provider_account_id.to_string(),
        tokens: account.tokens,
    })
}

pub fn unlink_account(conn: &Connection, provider: &str, provider_account_id: &str) -> CoreResult<()> {
    let removed = conn
        .execute(
            "DELETE FROM accounts WHERE provider = ? AND provider_account_id = ?",
            (provider, provider_account_id),
        )
        .map_err(storage("delete account"))?;
    if removed == 0 {
        return Err(CoreError::not_found(
            "account",
            format!("{}:{}", provider, provider_account_id),
        ));
    }
    Ok(())
}

pub fn list_accounts(conn: &Connection, user_id: &str) -> CoreResult<Vec<Account>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, user_id, type, provider, provider_account_id, refresh_token, access_token,
                    expires_at, token_type, scope, id_token, session_state
             FROM accounts WHERE user_id = ? ORDER BY provider, provider_account_id",
        )
        .map_err(storage("list accounts"))?;
    let rows = stmt
        .query_map([user_id], account_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(storage("list accounts"))?;
    Ok(rows)
}

pub fn create_session(
    conn: &Connection,
    user_id: &str,
    session_token: &str,
    expires: DateTime<Utc>,
) -> CoreResult<Session> {
    require_non_empty("sessionToken", session_token)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO sessions(id, session_token, user_id, expires) VALUES(?, ?, ?, ?)",
        (&id, session_token, user_id, ts(expires)),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::conflict("session", "sessions.session_token", session_token)
        } else if is_foreign_key_violation(&e) {
            CoreError::not_found("user", user_id)
        } else {
            storage("insert session")(e)
        }
    })?;
    Ok(Session {
        id,
        session_token: session_token.to_string(),
        user_id: user_id.to_string(),
        expires,
    })
}

/// Expired sessions read as absent; nothing sweeps them here.
pub fn get_session(
    conn: &Connection,
    session_token: &str,
    now: DateTime<Utc>,
) -> CoreResult<Option<Session>> {
    let session = conn
        .query_row(
            "SELECT id, session_token, user_id, expires FROM sessions WHERE session_token = ?",
            [session_token],
            session_from_row,
        )
        .optional()
        .map_err(storage("load session"))?;
    Ok(session.filter(|s| !s.is_expired(now)))
}

pub fn update_session_expiry(
    conn: &Connection,
    session_token: &str,
    expires: DateTime<Utc>,
) -> CoreResult<Session> {
    let changed = conn
        .execute(
            "UPDATE sessions SET expires = ? WHERE session_token = ?",
            (ts(expires), session_token),
        )
        .map_err(storage("update session"))?;
    if changed == 0 {
        return Err(CoreError::not_found("session", session_token));
    }
    conn.query_row(
        "SELECT id, session_token, user_id, expires FROM sessions WHERE session_token = ?",
        [session_token],
        session_from_row,
    )
    .map_err(storage("load session"))
}

/// Returns whether a row was removed.
pub fn delete_session(conn: &Connection, session_token: &str) -> CoreResult<bool> {
    let removed = conn
        .execute("DELETE FROM sessions WHERE session_token = ?", [session_token])
        .map_err(storage("delete session"))?;
    Ok(removed > 0)
}

pub fn purge_expired_sessions(conn: &Connection, now: DateTime<Utc>) -> CoreResult<usize> {
    let removed = conn
        .execute("DELETE FROM sessions WHERE expires <= ?", [ts(now)])
        .map_err(storage("purge sessions"))?;
    if removed > 0 {
        tracing::info!(removed, "expired sessions purged");
    }
    Ok(removed)
}

pub fn issue_verification_token(
    conn: &Connection,
    identifier: &str,
    token: &str,
    expires: DateTime<Utc>,
) -> CoreResult<VerificationToken> {
    require_non_empty("identifier", identifier)?;
    require_non_empty("token", token)?;
    conn.execute(
        "INSERT INTO verification_tokens(identifier, token_hash, expires) VALUES(?, ?, ?)",
        (identifier, token_digest(token), ts(expires)),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            let constraint = match violated_columns(&e) {
                Some(cols) if cols.contains("identifier") => "verification_tokens.identifier_token",
                _ => "verification_tokens.token",
            };
            CoreError::conflict("verification token", constraint, identifier)
        } else {
            storage("insert verification token")(e)
        }
    })?;
    Ok(VerificationToken {
        identifier: identifier.to_string(),
        token: token.to_string(),
        expires,
    })
}

/// Single-use: the row is removed by the same statement that reads it, so two
/// concurrent consumers cannot both succeed. Expired tokens are removed too but
/// reported as missing.
pub fn consume_verification_token(
    conn: &Connection,
    identifier: &str,
    token: &str,
    now: DateTime<Utc>,
) -> CoreResult<VerificationToken> {
    let expires: Option<String> = conn
        .query_row(
            "DELETE FROM verification_tokens WHERE identifier = ? AND token_hash = ?
             RETURNING expires",
            (identifier, token_digest(token)),
            |r| r.get(0),
        )
        .optional()
        .map_err(storage("consume verification token"))?;

    let Some(expires) = expires else {
        return Err(CoreError::not_found("verification token", identifier));
    };
    let expires = parse_ts(&expires).map_err(storage("consume verification token"))?;
    if expires <= now {
        tracing::debug!(identifier, "expired verification token discarded");
        return Err(CoreError::not_found("verification token", identifier));
    }
    Ok(VerificationToken {
        identifier: identifier.to_string(),
        token: token.to_string(),
        expires,
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeletion {
    pub accounts: usize,
    pub sessions: usize,
    pub enrollments: usize,
    pub classes: usize,
    pub essays: usize,
    pub feedback: usize,
}

/// Removes a user and everything that references them, in one transaction.
///
/// Classes the user teaches go with their enrollments and every essay filed
/// under them; the user's own essays are deleted with their feedback.
pub fn delete_user(conn: &Connection, user_id: &str) -> CoreResult<UserDeletion> {
    let tx = write_tx(conn).map_err(storage("begin user deletion"))?;

    let exists = count_rows(&tx, "SELECT COUNT(*) FROM users WHERE id = ?", user_id)
        .map_err(storage("load user"))?;
    if exists == 0 {
        return Err(CoreError::not_found("user", user_id));
    }

    let step = |table: &'static str, sql: &str| -> CoreResult<usize> {
        tx.execute(sql, [user_id]).map_err(|e| {
            tracing::warn!(user_id, table, error = %e, "user deletion rolled back");
            CoreError::CascadeFailure {
                entity: "user",
                key: user_id.to_string(),
                table,
                message: e.to_string(),
            }
        })
    };

    let mut summary = UserDeletion::default();

    // Essays in classes the user teaches, and the user's own essays anywhere.
    summary.feedback = step(
        "feedback",
        "DELETE FROM feedback
         WHERE essay_id IN (
           SELECT e.id FROM essays e
           WHERE e.author_id = ?1
              OR e.class_id IN (SELECT c.id FROM classes c WHERE c.teacher_id = ?1)
         )",
    )?;
    summary.essays = step(
        "essays",
        "DELETE FROM essays
         WHERE author_id = ?1
            OR class_id IN (SELECT c.id FROM classes c WHERE c.teacher_id = ?1)",
    )?;
    summary.enrollments = step(
        "students",
        "DELETE FROM students
         WHERE user_id = ?1
            OR class_id IN (SELECT c.id FROM classes c WHERE c.teacher_id = ?1)",
    )?;
    summary.classes = step("classes", "DELETE FROM classes WHERE teacher_id = ?")?;
    summary.accounts = step("accounts", "DELETE FROM accounts WHERE user_id = ?")?;
    summary.sessions = step("sessions", "DELETE FROM sessions WHERE user_id = ?")?;
    step("users", "DELETE FROM users WHERE id = ?")?;

    tx.commit().map_err(|e| CoreError::CascadeFailure {
        entity: "user",
        key: user_id.to_string(),
        table: "users",
        message: e.to_string(),
    })?;

    tracing::info!(user_id, ?summary, "user deleted");
    Ok(summary)
}
