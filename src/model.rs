//! Entities of the essay workspace and the read projections built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Teacher => "TEACHER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STUDENT" => Some(Role::Student),
            "TEACHER" => Some(Role::Teacher),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub email_verified: Option<DateTime<Utc>>,
    pub image: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether credential sign-in is available; the hash itself never leaves
    /// the store.
    pub fn has_password(&self) -> bool {
        self.hashed_password.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Credentials handed over by an external provider when an account is linked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTokens {
    pub refresh_token: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub provider: String,
    pub provider_account_id: String,
    #[serde(flatten)]
    pub tokens: AccountTokens,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub session_token: String,
    pub user_id: String,
    pub expires: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Only ever holds the token the caller presented; the store keeps a digest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationToken {
    pub identifier: String,
    pub token: String,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub teacher_id: String,
    pub created_at: DateTime<Utc>,
}

/// A `students` row: one user enrolled in one class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub class_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassRelation {
    Teacher,
    Student,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMembership {
    #[serde(flatten)]
    pub class: Class,
    pub relation: ClassRelation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Essay {
    pub id: String,
    pub title: String,
    pub content: String,
    pub prompt: String,
    pub image_url: Option<String>,
    pub author_id: String,
    pub class_id: Option<String>,
    pub scoring_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub essay_id: String,
    pub content_score: i64,
    pub language_score: i64,
    pub organization_score: i64,
    pub total_score: i64,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EssayState {
    Submitted,
    FeedbackPending,
    FeedbackReady,
}

impl EssayState {
    /// An in-flight scoring call wins over an existing row, so a re-score
    /// reads as pending until it lands.
    pub fn derive(essay: &Essay, feedback: Option<&Feedback>) -> Self {
        if essay.scoring_started_at.is_some() {
            EssayState::FeedbackPending
        } else if feedback.is_some() {
            EssayState::FeedbackReady
        } else {
            EssayState::Submitted
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EssayWithFeedback {
    pub essay: Essay,
    pub feedback: Option<Feedback>,
    pub state: EssayState,
}

impl EssayWithFeedback {
    pub fn new(essay: Essay, feedback: Option<Feedback>) -> Self {
        let state = EssayState::derive(&essay, feedback.as_ref());
        Self {
            essay,
            feedback,
            state,
        }
    }
}
