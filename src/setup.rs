use crate::db;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Scoring,
    Essays,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Scoring, SetupSection::Essays];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scoring" => Some(Self::Scoring),
            "essays" => Some(Self::Essays),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Scoring => "scoring",
            Self::Essays => "essays",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scoring => "setup.scoring",
            Self::Essays => "setup.essays",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scoring => json!({
            "minScore": 0,
            "maxScore": 100,
            "command": "",
            "args": [],
            "timeoutMs": 30000
        }),
        SetupSection::Essays => json!({
            "maxTitleChars": 200,
            "maxPromptChars": 2000,
            "maxContentChars": 50000
        }),
    }
}

/// Score range and the external program that produces scores.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringSettings {
    pub min_score: i64,
    pub max_score: i64,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EssayLimits {
    pub max_title_chars: usize,
    pub max_prompt_chars: usize,
    pub max_content_chars: usize,
}

impl Default for EssayLimits {
    fn default() -> Self {
        Self {
            max_title_chars: 200,
            max_prompt_chars: 2000,
            max_content_chars: 50000,
        }
    }
}

fn as_object_mut(v: &mut Value) -> Result<&mut Map<String, Value>, String> {
    v.as_object_mut()
        .ok_or_else(|| "section must be an object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_string_list(v: &Value, key: &str, max_items: usize) -> Result<Vec<Value>, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    if items.len() > max_items {
        return Err(format!("{} must have at most {} items", key, max_items));
    }
    items
        .iter()
        .map(|it| {
            it.as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| format!("{} must be an array of strings", key))
        })
        .collect()
}

fn merge_field(
    section: SetupSection,
    obj: &mut Map<String, Value>,
    k: &str,
    v: &Value,
) -> Result<(), String> {
    let value = match section {
        SetupSection::Scoring => match k {
            "minScore" | "maxScore" => Value::from(parse_i64_range(v, k, -1000, 1000)?),
            "command" => Value::String(parse_string_max(v, k, 1024)?),
            "args" => Value::Array(parse_string_list(v, k, 32)?),
            "timeoutMs" => Value::from(parse_i64_range(v, k, 100, 600_000)?),
            _ => return Err(format!("unknown scoring field: {}", k)),
        },
        SetupSection::Essays => match k {
            "maxTitleChars" => Value::from(parse_i64_range(v, k, 1, 1000)?),
            "maxPromptChars" => Value::from(parse_i64_range(v, k, 1, 20_000)?),
            "maxContentChars" => Value::from(parse_i64_range(v, k, 1, 1_000_000)?),
            _ => return Err(format!("unknown essays field: {}", k)),
        },
    };
    obj.insert(k.to_string(), value);
    Ok(())
}

fn check_section(section: SetupSection, obj: &Map<String, Value>) -> Result<(), String> {
    if section == SetupSection::Scoring {
        let min = obj.get("minScore").and_then(|v| v.as_i64()).unwrap_or(0);
        let max = obj.get("maxScore").and_then(|v| v.as_i64()).unwrap_or(0);
        if min >= max {
            return Err("minScore must be less than maxScore".into());
        }
    }
    Ok(())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        merge_field(section, obj, k, v)?;
    }
    check_section(section, obj)
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let defaults = default_section(section);
    let mut current = defaults.clone();
    let Some(saved) = db::settings_get_json(conn, section.key())? else {
        return Ok(current);
    };
    let Some(saved_obj) = saved.as_object() else {
        return Ok(current);
    };
    let obj = as_object_mut(&mut current).map_err(anyhow::Error::msg)?;

    // Malformed saved values fall back to defaults field by field.
    for (k, v) in saved_obj {
        if let Err(msg) = merge_field(section, obj, k, v) {
            tracing::warn!(section = section.name(), field = %k, %msg, "ignoring saved setting");
        }
    }
    if let Err(msg) = check_section(section, obj) {
        tracing::warn!(section = section.name(), %msg, "saved score range reset");
        for k in ["minScore", "maxScore"] {
            if let Some(d) = defaults.get(k) {
                obj.insert(k.to_string(), d.clone());
            }
        }
    }
    Ok(current)
}

/// Applies a patch and persists the merged section. Validation failures come
/// back as `Ok(Err(message))` so callers can tell them from storage failures.
pub fn update_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn scoring_settings(conn: &rusqlite::Connection) -> anyhow::Result<ScoringSettings> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Scoring)?)?)
}

pub fn essay_limits(conn: &rusqlite::Connection) -> anyhow::Result<EssayLimits> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Essays)?)?)
}
