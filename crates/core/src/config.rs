// Session configuration

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

pub const ENV_AUTO_CONNECT: &str = "DBCONTEXT_AUTO_CONNECT";
pub const ENV_AUTO_COMMIT: &str = "DBCONTEXT_AUTO_COMMIT";

/// Caller-owned session options.
///
/// A session snapshots these once when it initializes; later changes do not
/// affect the running unit of work. `auto_commit` implies `auto_connect`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Connect before the unit of work, disconnect after it
    pub auto_connect: bool,

    /// Wrap the unit of work in BEGIN / COMMIT-or-ROLLBACK
    pub auto_commit: bool,
}

impl SessionConfig {
    pub fn auto_commit() -> Self {
        Self {
            auto_connect: true,
            auto_commit: true,
        }
    }

    pub fn auto_connect() -> Self {
        Self {
            auto_connect: true,
            auto_commit: false,
        }
    }

    /// Load from `DBCONTEXT_AUTO_CONNECT` / `DBCONTEXT_AUTO_COMMIT`; unset means false
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let flag = |key: &str| match lookup(key) {
            Some(raw) => parse_flag(key, &raw),
            None => Ok(false),
        };
        Ok(Self {
            auto_connect: flag(ENV_AUTO_CONNECT)?,
            auto_commit: flag(ENV_AUTO_COMMIT)?,
        })
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "{} must be a boolean flag, got `{}`",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_off() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert!(!config.auto_connect);
        assert!(!config.auto_commit);
    }

    #[test]
    fn test_env_flags() {
        let config = SessionConfig::from_lookup(lookup(&[
            (ENV_AUTO_CONNECT, "no"),
            (ENV_AUTO_COMMIT, " TRUE "),
        ]))
        .unwrap();
        assert!(!config.auto_connect);
        assert!(config.auto_commit);
    }

    #[test]
    fn test_invalid_flag() {
        let err = SessionConfig::from_lookup(lookup(&[(ENV_AUTO_COMMIT, "maybe")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains(ENV_AUTO_COMMIT));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"autoCommit": true, "coloredReport": true}"#).unwrap();
        assert!(config.auto_commit);
        assert!(!config.auto_connect);
    }
}
