//! Bundle manifest declaration and validation.
//!
//! A bundle file is a UTF-8 JSON object; every field is optional and an empty
//! file is a manifest with all defaults.
//!
//! # Invariants
//! - `factory` ids use lowercase ascii letters/digits with single `.`, `_` or
//!   `-` separators.
//! - `version` is a `major.minor.patch` triplet.
//! - `configuration`, when present, is a JSON object.

use crate::extension::api::ConfigMap;
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Version reported when a manifest does not declare one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Declarative bundle manifest as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleManifest {
    /// Built-in factory id; defaults to the derived extension name.
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Initial configuration handed to the extension context.
    #[serde(default)]
    pub configuration: Option<Value>,
    /// Initial enabled flag; installed extensions are enabled by default.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Manifest with defaults applied for one extension name.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedManifest {
    pub factory: String,
    pub version: String,
    pub description: Option<String>,
    pub configuration: ConfigMap,
    pub enabled: bool,
}

impl BundleManifest {
    /// Parses manifest bytes. Blank input yields the default manifest.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestValidationError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| ManifestValidationError::Malformed(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text).map_err(|err| ManifestValidationError::Malformed(err.to_string()))
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if let Some(factory) = &self.factory {
            if factory.trim().is_empty() {
                return Err(ManifestValidationError::EmptyFactory);
            }
            if !is_valid_extension_id(factory.trim()) {
                return Err(ManifestValidationError::InvalidFactory(factory.clone()));
            }
        }

        if let Some(version) = &self.version {
            if version.trim().is_empty() {
                return Err(ManifestValidationError::EmptyVersion);
            }
            if !is_semver_triplet(version.trim()) {
                return Err(ManifestValidationError::InvalidVersion(version.clone()));
            }
        }

        match &self.configuration {
            None | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(ManifestValidationError::ConfigurationNotObject),
        }
    }

    /// Validates and applies defaults for the extension `name`.
    pub fn resolve(self, name: &str) -> Result<ResolvedManifest, ManifestValidationError> {
        self.validate()?;

        let configuration = match self.configuration {
            Some(Value::Object(map)) => map,
            _ => ConfigMap::new(),
        };
        let description = self
            .description
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(ResolvedManifest {
            factory: self
                .factory
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| name.to_string()),
            version: self
                .version
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            description,
            configuration,
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

pub(crate) fn is_valid_extension_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

pub(crate) fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest parse and validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    Malformed(String),
    EmptyFactory,
    InvalidFactory(String),
    EmptyVersion,
    InvalidVersion(String),
    ConfigurationNotObject,
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(details) => write!(f, "manifest is not valid JSON: {details}"),
            Self::EmptyFactory => write!(f, "manifest factory must not be empty"),
            Self::InvalidFactory(value) => write!(f, "manifest factory is invalid: {value}"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::ConfigurationNotObject => {
                write!(f, "manifest configuration must be a JSON object")
            }
        }
    }
}

impl Error for ManifestValidationError {}
