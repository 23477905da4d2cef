use std::env;
use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "COURSED_WORKSPACE";
pub const ENV_LOG: &str = "COURSED_LOG";
pub const ENV_LOG_FORMAT: &str = "COURSED_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Process-level settings. Workspace-level settings live in the
/// `settings` table and are edited over IPC.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let workspace = non_empty(ENV_WORKSPACE).map(PathBuf::from);
        let log_filter = non_empty(ENV_LOG)
            .or_else(|| non_empty("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());
        let log_format = non_empty(ENV_LOG_FORMAT)
            .map(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Text);
        Self {
            workspace,
            log_filter,
            log_format,
        }
    }
}
