use rusqlite::Connection;
use tempfile::TempDir;

use crate::db;
use crate::identity;
use crate::model::{Role, User};
use crate::scoring::{RawScores, Scorer, ScoringError};

/// Fresh workspace; keep the `TempDir` alive for as long as the connection.
pub fn open_temp() -> (Connection, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let conn = db::open_db(dir.path()).expect("open db");
    (conn, dir)
}

pub fn seed_user(conn: &Connection, email: &str, role: Role) -> User {
    identity::create_user(conn, email, None, None, role).expect("seed user")
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |r| r.get(0)).expect("count query")
}

/// Scorer that always answers with the same result.
pub struct FixedScorer(pub Result<RawScores, String>);

impl FixedScorer {
    pub fn ok(content: i64, language: i64, organization: i64, text: &str) -> Self {
        FixedScorer(Ok(RawScores {
            content_score: content,
            language_score: language,
            organization_score: organization,
            feedback: text.to_string(),
        }))
    }

    pub fn failing(message: &str) -> Self {
        FixedScorer(Err(message.to_string()))
    }
}

impl Scorer for FixedScorer {
    fn score(&self, _content: &str, _prompt: &str) -> Result<RawScores, ScoringError> {
        self.0.clone().map_err(ScoringError::Failed)
    }
}
