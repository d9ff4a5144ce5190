//! Runtime configuration
//!
//! Everything is read once from the environment (after `.env` is loaded) and
//! handed to the orchestrator as immutable values.

use crate::error::{ReliefError, Result};
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_LLM_MODEL: &str = "qwen3-max";

#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: 0.5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    #[serde(skip_serializing)]
    pub database_url: String,
    pub max_connections: u32,
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateConfig {
    /// Reject statements naming tables outside the schema before dispatch.
    pub enforce_table_allowlist: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enforce_table_allowlist: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub gate: GateConfig,
}

impl AppConfig {
    /// Load from the process environment. Missing credentials are an error;
    /// everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        let api_key = lookup("LLM_API_KEY")
            .or_else(|| lookup("DASHSCOPE_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ReliefError::Config("LLM_API_KEY (or DASHSCOPE_API_KEY) is not set".to_string())
            })?;
        let database_url = lookup("DATABASE_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ReliefError::Config("DATABASE_URL is not set".to_string()))?;

        let llm = LlmConfig {
            api_key,
            base_url: lookup("LLM_BASE_URL").unwrap_or(defaults.llm.base_url),
            model: lookup("LLM_MODEL").unwrap_or(defaults.llm.model),
            temperature: parse_var(&lookup, "LLM_TEMPERATURE")?.unwrap_or(defaults.llm.temperature),
            timeout: parse_var(&lookup, "LLM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm.timeout),
        };

        let store = StoreConfig {
            database_url,
            max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.store.max_connections),
            timeout: parse_var(&lookup, "STORE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.store.timeout),
        };

        let gate = GateConfig {
            enforce_table_allowlist: parse_var(&lookup, "ENFORCE_TABLE_ALLOWLIST")?
                .unwrap_or(defaults.gate.enforce_table_allowlist),
        };

        Ok(Self { llm, store, gate })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ReliefError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_apply_when_only_credentials_are_set() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DASHSCOPE_API_KEY", "sk-test"),
            ("DATABASE_URL", "mysql://root@localhost/society"),
        ]))
        .unwrap();

        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.base_url, DEFAULT_LLM_BASE_URL);
        assert_eq!(config.llm.model, "qwen3-max");
        assert_eq!(config.llm.timeout, Duration::from_secs(60));
        assert_eq!(config.store.timeout, Duration::from_secs(30));
        assert!(config.gate.enforce_table_allowlist);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "sk-a"),
            ("DASHSCOPE_API_KEY", "sk-b"),
            ("DATABASE_URL", "mysql://db/society"),
            ("LLM_MODEL", "qwen-plus"),
            ("LLM_TEMPERATURE", "0.1"),
            ("LLM_TIMEOUT_SECS", "5"),
            ("STORE_TIMEOUT_SECS", "7"),
            ("DB_MAX_CONNECTIONS", "2"),
            ("ENFORCE_TABLE_ALLOWLIST", "false"),
        ]))
        .unwrap();

        assert_eq!(config.llm.api_key, "sk-a");
        assert_eq!(config.llm.model, "qwen-plus");
        assert!((config.llm.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.llm.timeout, Duration::from_secs(5));
        assert_eq!(config.store.timeout, Duration::from_secs(7));
        assert_eq!(config.store.max_connections, 2);
        assert!(!config.gate.enforce_table_allowlist);
    }

    #[test]
    fn test_missing_credentials_are_config_errors() {
        let err = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "mysql://db")])).unwrap_err();
        assert!(matches!(err, ReliefError::Config(_)));

        let err = AppConfig::from_lookup(lookup_from(&[("LLM_API_KEY", "sk")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("LLM_API_KEY", "sk"),
            ("DATABASE_URL", "mysql://db"),
            ("LLM_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("LLM_TIMEOUT_SECS"));
    }
}
