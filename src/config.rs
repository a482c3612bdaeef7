//! Process configuration. Workspace-level settings live in `setup`.

use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "essayd=info";

#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,

    /// `tracing` filter directive; output goes to stderr.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            workspace: lookup("ESSAYD_WORKSPACE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            log_filter: lookup("ESSAYD_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = Config::from_lookup(|key| match key {
            "ESSAYD_WORKSPACE" => Some("  ".into()),
            "ESSAYD_LOG" => Some(String::new()),
            _ => None,
        });
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn reads_workspace_and_filter() {
        let cfg = Config::from_lookup(|key| match key {
            "ESSAYD_WORKSPACE" => Some("/srv/essays".into()),
            "ESSAYD_LOG" => Some("essayd=debug".into()),
            _ => None,
        });
        assert_eq!(cfg.workspace, Some(PathBuf::from("/srv/essays")));
        assert_eq!(cfg.log_filter, "essayd=debug");
    }
}
