//! Boundary with the external scoring program and the score aggregation rule.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::setup::ScoringSettings;

/// What the scoring collaborator hands back for one essay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScores {
    pub content_score: i64,
    pub language_score: i64,
    pub organization_score: i64,
    pub feedback: String,
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("no scoring command configured")]
    NotConfigured,

    #[error("scorer did not answer within {0} ms")]
    Timeout(u64),

    #[error("scorer exited with {0}")]
    Exit(String),

    #[error("scorer output unusable: {0}")]
    BadOutput(String),

    #[error("{0}")]
    Failed(String),
}

pub trait Scorer: Send + Sync {
    fn score(&self, content: &str, prompt: &str) -> Result<RawScores, ScoringError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBounds {
    pub min: i64,
    pub max: i64,
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self { min: 0, max: 100 }
    }
}

impl From<&ScoringSettings> for ScoreBounds {
    fn from(s: &ScoringSettings) -> Self {
        Self {
            min: s.min_score,
            max: s.max_score,
        }
    }
}

/// Unweighted mean of the three component scores, rounded half-up.
///
/// `floor(sum / 3 + 1/2)` in integers is `floor((2 * sum + 3) / 6)`.
pub fn total_score(content: i64, language: i64, organization: i64) -> i64 {
    let sum = content + language + organization;
    (2 * sum + 3).div_euclid(6)
}

/// Scores ready to persist. The total can only come from `total_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFeedback {
    content_score: i64,
    language_score: i64,
    organization_score: i64,
    total_score: i64,
    feedback: String,
}

impl ScoredFeedback {
    pub fn new(raw: RawScores, bounds: ScoreBounds) -> Result<Self, ScoringError> {
        for (name, v) in [
            ("contentScore", raw.content_score),
            ("languageScore", raw.language_score),
            ("organizationScore", raw.organization_score),
        ] {
            if !(bounds.min..=bounds.max).contains(&v) {
                return Err(ScoringError::BadOutput(format!(
                    "{} {} outside {}..={}",
                    name, v, bounds.min, bounds.max
                )));
            }
        }
        Ok(Self {
            total_score: total_score(raw.content_score, raw.language_score, raw.organization_score),
            content_score: raw.content_score,
            language_score: raw.language_score,
            organization_score: raw.organization_score,
            feedback: raw.feedback,
        })
    }

    pub fn content_score(&self) -> i64 {
        self.content_score
    }

    pub fn language_score(&self) -> i64 {
        self.language_score
    }

    pub fn organization_score(&self) -> i64 {
        self.organization_score
    }

    pub fn total_score(&self) -> i64 {
        self.total_score
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }
}

/// Runs an external program per essay: JSON request on stdin, JSON scores on
/// stdout. The child is killed when it overruns the timeout.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    program: String,
    args: Vec<String>,
    timeout_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreRequest<'a> {
    essay_content: &'a str,
    prompt: &'a str,
}

impl CommandScorer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_ms: u64) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_ms,
        }
    }

    pub fn from_settings(s: &ScoringSettings) -> Self {
        Self::new(s.command.clone(), s.args.clone(), s.timeout_ms)
    }
}

impl Scorer for CommandScorer {
    fn score(&self, content: &str, prompt: &str) -> Result<RawScores, ScoringError> {
        if self.program.trim().is_empty() {
            return Err(ScoringError::NotConfigured);
        }
        let payload = serde_json::to_vec(&ScoreRequest {
            essay_content: content,
            prompt,
        })
        .map_err(|e| ScoringError::Failed(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ScoringError::Failed(format!("spawn {}: {}", self.program, e)))?;

        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScoringError::Failed("scorer stdout unavailable".into()))?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut out = String::new();
            let res = stdout.read_to_string(&mut out).map(|_| out);
            let _ = tx.send(res);
        });

        if let Some(mut stdin) = child.stdin.take() {
            // Written off-thread so a scorer that never drains stdin still
            // runs into the timeout.
            std::thread::spawn(move || {
                let _ = stdin.write_all(&payload);
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let status = match child.wait_timeout(remaining) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ScoringError::Timeout(self.timeout_ms));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ScoringError::Failed(format!("wait for scorer: {}", e)));
            }
        };
        if !status.success() {
            return Err(ScoringError::Exit(status.to_string()));
        }

        // A grandchild can hold stdout open after the scorer exits.
        let out = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(res) => res.map_err(|e| ScoringError::Failed(e.to_string()))?,
            Err(_) => return Err(ScoringError::Timeout(self.timeout_ms)),
        };

        serde_json::from_str::<RawScores>(out.trim())
            .map_err(|e| ScoringError::BadOutput(e.to_string()))
    }
}
