//! Host configuration.
//!
//! # Responsibility
//! - Provide defaults for the managed bundle directory and logging.
//! - Load overrides from a JSON file and from `PLUGHOST_*` variables.
//!
//! # Invariants
//! - A validated config has a non-empty directory and a bare suffix
//!   (no dot, no path separator).

use crate::logging::{default_log_level, normalize_level};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const DEFAULT_BUNDLE_DIR: &str = "plugins";
pub const DEFAULT_BUNDLE_SUFFIX: &str = "bundle";

pub const ENV_BUNDLE_DIR: &str = "PLUGHOST_BUNDLE_DIR";
pub const ENV_LOG_LEVEL: &str = "PLUGHOST_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PLUGHOST_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Managed bundle directory, created on first use.
    pub bundle_dir: PathBuf,
    /// Bundle file suffix without the leading dot.
    pub bundle_suffix: String,
    pub log_level: String,
    /// Rolling log directory; stderr logging when absent.
    pub log_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from(DEFAULT_BUNDLE_DIR),
            bundle_suffix: DEFAULT_BUNDLE_SUFFIX.to_string(),
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl HostConfig {
    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `PLUGHOST_*` overrides resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(value) = non_empty(ENV_BUNDLE_DIR) {
            self.bundle_dir = PathBuf::from(value.trim());
        }
        if let Some(value) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = value.trim().to_string();
        }
        if let Some(value) = non_empty(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(value.trim()));
        }
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env(|key| std::env::var(key).ok());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bundle_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("bundle_dir must not be empty".into()));
        }
        let suffix = self.bundle_suffix.trim();
        if suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "bundle_suffix must not be empty".into(),
            ));
        }
        if suffix.contains(['.', '/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "bundle_suffix must be a bare extension: `{suffix}`"
            )));
        }
        normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, HostConfig, ENV_BUNDLE_DIR, ENV_LOG_DIR, ENV_LOG_LEVEL};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        let config = HostConfig::default();
        assert_eq!(config.bundle_dir, PathBuf::from("plugins"));
        assert_eq!(config.bundle_suffix, "bundle");
        assert!(config.log_dir.is_none());
        config.validate().expect("defaults validate");
    }

    #[test]
    fn file_values_merge_with_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plughost.json");
        std::fs::write(&path, r#"{"bundle_dir": "/srv/ext", "log_level": "warn"}"#)
            .expect("write config");

        let config = HostConfig::from_file(&path).expect("config loads");
        assert_eq!(config.bundle_dir, PathBuf::from("/srv/ext"));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.bundle_suffix, "bundle");
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plughost.json");
        std::fs::write(&path, r#"{"plugin_dir": "x"}"#).expect("write config");
        let err = HostConfig::from_file(&path).expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply_and_skip_blank_values() {
        let vars = HashMap::from([
            (ENV_BUNDLE_DIR, "/opt/bundles"),
            (ENV_LOG_LEVEL, "  "),
            (ENV_LOG_DIR, "/var/log/plughost"),
        ]);
        let mut config = HostConfig::default();
        let default_level = config.log_level.clone();
        config.apply_env(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.bundle_dir, PathBuf::from("/opt/bundles"));
        assert_eq!(config.log_level, default_level);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/plughost")));
    }

    #[test]
    fn validate_rejects_bad_suffix_and_level() {
        for suffix in ["", ".bundle", "a/b"] {
            let config = HostConfig {
                bundle_suffix: suffix.to_string(),
                ..HostConfig::default()
            };
            assert!(config.validate().is_err(), "suffix {suffix:?}");
        }

        let config = HostConfig {
            log_level: "verbose".to_string(),
            ..HostConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
