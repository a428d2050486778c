//! Configuration surface consumed by correction sessions.
//!
//! Loaded once (TOML file, then environment overrides), validated, and shared
//! read-only between sessions as `Arc<CorrectionConfig>`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{StrategyTable, VibeError};
use crate::sandbox::ExecutionLimits;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{var}={value:?} is not a valid value")]
    BadEnv { var: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

impl From<ConfigError> for VibeError {
    fn from(err: ConfigError) -> Self {
        VibeError::InvalidConfig(err.to_string())
    }
}

/// Attempt budget and collaborator call policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Maximum executions per session.
    pub max_attempts: u32,
    /// Total calls per collaborator request before the session is `Fatal`.
    pub collaborator_attempts: u32,
    /// Base backoff between collaborator calls; doubles on every retry.
    pub collaborator_backoff_ms: u64,
    /// Ceiling for one collaborator call.
    pub collaborator_timeout_ms: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            collaborator_attempts: 3,
            collaborator_backoff_ms: 500,
            collaborator_timeout_ms: 60_000,
        }
    }
}

/// Stagnation detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagnationSettings {
    /// Trailing near-identical failures that flag the session stagnant.
    pub window: usize,
    /// Trailing near-identical failures that force `Exhausted`.
    pub threshold: usize,
    /// Minimum detail similarity in `(0, 1]` for two failures to count as the same.
    pub similarity: f64,
}

impl Default for StagnationSettings {
    fn default() -> Self {
        Self {
            window: 3,
            threshold: 3,
            similarity: 0.85,
        }
    }
}

/// Complete read-only configuration for correction sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CorrectionConfig {
    pub sandbox: ExecutionLimits,
    pub correction: LoopSettings,
    pub stagnation: StagnationSettings,
    pub strategies: StrategyTable,
}

impl CorrectionConfig {
    /// Read a TOML file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `VIBECODE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "VIBECODE_MAX_ATTEMPTS")? {
            self.correction.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "VIBECODE_TIMEOUT_MS")? {
            self.sandbox.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "VIBECODE_MEMORY_LIMIT_MB")? {
            self.sandbox.memory_limit_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "VIBECODE_STAGNATION_WINDOW")? {
            self.stagnation.window = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correction.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.correction.collaborator_attempts == 0 {
            return Err(ConfigError::Invalid(
                "collaborator_attempts must be greater than 0".into(),
            ));
        }
        if self.correction.collaborator_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "collaborator_timeout_ms must be greater than 0".into(),
            ));
        }
        self.sandbox
            .check()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let s = &self.stagnation;
        if s.window == 0 {
            return Err(ConfigError::Invalid(
                "stagnation window must be greater than 0".into(),
            ));
        }
        if s.threshold == 0 || s.threshold > s.window + 1 {
            return Err(ConfigError::Invalid(format!(
                "stagnation threshold must be between 1 and window + 1 ({}), got {}",
                s.window + 1,
                s.threshold
            )));
        }
        if !(s.similarity > 0.0 && s.similarity <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "stagnation similarity must be in (0, 1], got {}",
                s.similarity
            )));
        }

        self.strategies.check().map_err(ConfigError::Invalid)
    }

    /// Load from an optional file, apply environment overrides, validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadEnv { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Strategy, StrategyEntry};
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = CorrectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.correction.max_attempts, 5);
        assert_eq!(config.stagnation.window, 3);
        assert_eq!(config.strategies.first(), Strategy::Conservative);
    }

    #[test]
    fn test_zero_attempt_budget_is_rejected() {
        let mut config = CorrectionConfig::default();
        config.correction.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
        let vibe: VibeError = err.into();
        assert!(matches!(vibe, VibeError::InvalidConfig(_)));
    }

    #[test]
    fn test_threshold_above_window_plus_one_is_rejected() {
        let mut config = CorrectionConfig::default();
        config.stagnation.threshold = 5;
        assert!(config.validate().is_err());
        config.stagnation.threshold = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_similarity_bounds() {
        let mut config = CorrectionConfig::default();
        config.stagnation.similarity = 0.0;
        assert!(config.validate().is_err());
        config.stagnation.similarity = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_misordered_strategy_table_is_rejected() {
        let mut config = CorrectionConfig::default();
        config.strategies = StrategyTable::new(vec![
            StrategyEntry {
                strategy: Strategy::Hybrid,
                directive: "h".into(),
            },
            StrategyEntry {
                strategy: Strategy::Conservative,
                directive: "c".into(),
            },
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("VIBECODE_MAX_ATTEMPTS", "7"),
            ("VIBECODE_TIMEOUT_MS", "1500"),
            ("VIBECODE_STAGNATION_WINDOW", " 4 "),
        ]
        .into_iter()
        .collect();
        let mut config = CorrectionConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.correction.max_attempts, 7);
        assert_eq!(config.sandbox.timeout_ms, 1500);
        assert_eq!(config.stagnation.window, 4);
        assert_eq!(config.sandbox.memory_limit_mb, 256);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = CorrectionConfig::default();
        let err = config
            .apply_overrides(|k| (k == "VIBECODE_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BadEnv {
                var: "VIBECODE_MAX_ATTEMPTS",
                ..
            }
        ));
    }

    #[test]
    fn test_partial_toml() {
        let config: CorrectionConfig = toml::from_str(
            r#"
[correction]
max_attempts = 2

[stagnation]
similarity = 0.9
"#,
        )
        .unwrap();
        assert_eq!(config.correction.max_attempts, 2);
        assert_eq!(config.correction.collaborator_attempts, 3);
        assert_eq!(config.stagnation.similarity, 0.9);
        assert_eq!(config.sandbox.timeout_ms, 30_000);
    }

    #[test]
    fn test_strategy_table_from_toml() {
        let config: CorrectionConfig = toml::from_str(
            r#"
[[strategies]]
strategy = "standard"
directive = "fix it"

[[strategies]]
strategy = "rewrite"
directive = "start over"
"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategies.first(), Strategy::Standard);
        assert_eq!(config.strategies.hybrid_rank(), None);
    }
}
