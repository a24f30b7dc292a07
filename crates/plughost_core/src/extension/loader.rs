//! Bundle loading into isolated extension instances.
//!
//! # Responsibility
//! - Derive the extension name from a bundle filename.
//! - Parse the bundle manifest and select a built-in factory.
//! - Construct and initialize one instance in its own context.
//!
//! # Invariants
//! - Construction and `initialize` run under panic containment; a failure
//!   never touches instances that are already loaded.
//! - The loader never registers what it builds.

use crate::bundle::store::BundleRecord;
use crate::extension::api::{guarded, ExtensionContext, ExtensionFault};
use crate::extension::factory::ExtensionFactories;
use crate::extension::manifest::{is_semver_triplet, BundleManifest, ManifestValidationError};
use crate::extension::registry::{ExtensionMetadata, LoadedExtension};
use log::{debug, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Instant;

/// Derives the registry name from a bundle filename.
///
/// The `.suffix` is stripped, then a trailing version marker
/// (`-v1`, `-v2.3`, `-1.2.0`) is removed: `echo-v1.bundle` -> `echo`.
pub fn derive_extension_name(filename: &str, suffix: &str) -> Result<String, LoadError> {
    let trimmed = filename.trim();
    let invalid = || LoadError::InvalidName(trimmed.to_string());

    let stem = trimmed
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('.'))
        .ok_or_else(invalid)?;
    // Repeat until stable so `<name>.<suffix>` derives back to `name`.
    let mut name = stem;
    loop {
        let stripped = strip_version_marker(name);
        if stripped == name {
            break;
        }
        name = stripped;
    }

    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(invalid());
    }
    Ok(name.to_string())
}

fn strip_version_marker(stem: &str) -> &str {
    let Some((head, marker)) = stem.rsplit_once('-') else {
        return stem;
    };
    if head.is_empty() {
        return stem;
    }

    let is_tagged = marker
        .strip_prefix('v')
        .map(is_numeric_version)
        .unwrap_or(false);
    if is_tagged || is_semver_triplet(marker) {
        head
    } else {
        stem
    }
}

fn is_numeric_version(value: &str) -> bool {
    !value.is_empty()
        && value
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Turns bundle records into initialized, unregistered extension instances.
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    factories: ExtensionFactories,
    suffix: String,
}

impl ExtensionLoader {
    pub fn new(factories: ExtensionFactories, suffix: impl Into<String>) -> Self {
        Self {
            factories,
            suffix: suffix.into(),
        }
    }

    /// Derives the registry name for `filename` using this loader's suffix.
    pub fn derive_name(&self, filename: &str) -> Result<String, LoadError> {
        derive_extension_name(filename, &self.suffix)
    }

    /// Builds and initializes one extension from `bundle`.
    ///
    /// # Errors
    /// - `InvalidName` when the filename does not yield a usable name.
    /// - `Read` / `InvalidManifest` when the bundle cannot be parsed.
    /// - `UnknownFactory` when no built-in factory matches.
    /// - `Construct` / `Initialize` when extension code fails or panics.
    pub fn load(&self, bundle: &BundleRecord) -> Result<LoadedExtension, LoadError> {
        let started_at = Instant::now();
        let name = self.derive_name(&bundle.filename)?;

        let bytes = std::fs::read(&bundle.path).map_err(|source| LoadError::Read {
            path: bundle.path.clone(),
            source,
        })?;
        let manifest = BundleManifest::parse(&bytes)
            .and_then(|manifest| manifest.resolve(&name))
            .map_err(|source| LoadError::InvalidManifest {
                name: name.clone(),
                source,
            })?;

        let factory =
            self.factories
                .get(&manifest.factory)
                .ok_or_else(|| LoadError::UnknownFactory {
                    name: name.clone(),
                    factory: manifest.factory.clone(),
                })?;

        let context = ExtensionContext::new(
            name.clone(),
            manifest.version.clone(),
            manifest.configuration.clone(),
        );
        let instance = guarded(|| factory.construct(&context)).map_err(|fault| {
            warn!(
                "event=extension_construct module=loader status=error name={} factory={} error={}",
                name, manifest.factory, fault
            );
            LoadError::Construct {
                name: name.clone(),
                fault,
            }
        })?;
        guarded(|| instance.initialize(&context)).map_err(|fault| {
            warn!(
                "event=extension_initialize module=loader status=error name={} error={}",
                name, fault
            );
            LoadError::Initialize {
                name: name.clone(),
                fault,
            }
        })?;

        let description = manifest
            .description
            .unwrap_or_else(|| factory.description().to_string());
        let metadata = ExtensionMetadata::new(
            name.clone(),
            manifest.version,
            description,
            manifest.factory,
        );
        debug!(
            "event=extension_load module=loader status=ok name={} instance_id={} duration_ms={}",
            name,
            metadata.instance_id,
            started_at.elapsed().as_millis()
        );

        Ok(LoadedExtension::new(
            metadata,
            instance,
            manifest.configuration,
            manifest.enabled,
        ))
    }
}

/// Failure turning a bundle into a runnable extension.
#[derive(Debug)]
pub enum LoadError {
    InvalidName(String),
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidManifest {
        name: String,
        source: ManifestValidationError,
    },
    UnknownFactory {
        name: String,
        factory: String,
    },
    Construct {
        name: String,
        fault: ExtensionFault,
    },
    Initialize {
        name: String,
        fault: ExtensionFault,
    },
    /// Another bundle in the same directory derives the same name and wins.
    Shadowed {
        name: String,
        winner: String,
    },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(filename) => {
                write!(f, "bundle filename does not yield an extension name: `{filename}`")
            }
            Self::Read { path, source } => {
                write!(f, "failed to read bundle `{}`: {source}", path.display())
            }
            Self::InvalidManifest { name, source } => {
                write!(f, "invalid manifest for `{name}`: {source}")
            }
            Self::UnknownFactory { name, factory } => {
                write!(f, "no built-in factory `{factory}` for extension `{name}`")
            }
            Self::Construct { name, fault } => {
                write!(f, "failed to construct extension `{name}`: {fault}")
            }
            Self::Initialize { name, fault } => {
                write!(f, "failed to initialize extension `{name}`: {fault}")
            }
            Self::Shadowed { name, winner } => {
                write!(f, "bundle for `{name}` is shadowed by `{winner}`")
            }
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::InvalidManifest { source, .. } => Some(source),
            Self::Construct { fault, .. } | Self::Initialize { fault, .. } => Some(fault),
            Self::InvalidName(_) | Self::UnknownFactory { .. } | Self::Shadowed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_extension_name, ExtensionLoader, LoadError};
    use crate::bundle::store::BundleRecord;
    use crate::extension::api::{Extension, ExtensionContext, ExtensionResult, Params};
    use crate::extension::factory::ExtensionFactories;
    use serde_json::{json, Value};
    use std::path::Path;

    struct FailingInit;

    impl Extension for FailingInit {
        fn initialize(&self, _context: &ExtensionContext) -> ExtensionResult<()> {
            Err("missing api key".into())
        }

        fn execute(&self, _params: &Params) -> ExtensionResult<Value> {
            Ok(Value::Null)
        }
    }

    fn write_bundle(dir: &Path, filename: &str, body: &str) -> BundleRecord {
        let path = dir.join(filename);
        std::fs::write(&path, body).expect("write bundle");
        BundleRecord {
            path,
            filename: filename.to_string(),
        }
    }

    fn loader() -> ExtensionLoader {
        let mut factories = ExtensionFactories::with_builtins();
        factories
            .register("failing", "", |_ctx| Ok(Box::new(FailingInit)))
            .expect("register failing");
        factories
            .register("exploding", "", |_ctx| panic!("constructor blew up"))
            .expect("register exploding");
        ExtensionLoader::new(factories, "bundle")
    }

    #[test]
    fn derives_names_from_filenames() {
        let cases = [
            ("echo.bundle", "echo"),
            ("echo-v1.bundle", "echo"),
            ("echo-v2.3.bundle", "echo"),
            ("echo-1.2.0.bundle", "echo"),
            ("stock-quotes.bundle", "stock-quotes"),
            ("stock-quotes-v10.bundle", "stock-quotes"),
            ("echo-v1-v2.bundle", "echo"),
        ];
        for (filename, expected) in cases {
            assert_eq!(
                derive_extension_name(filename, "bundle").expect("name derives"),
                expected,
                "filename {filename}"
            );
        }
    }

    #[test]
    fn rejects_filenames_without_suffix_or_name() {
        for filename in ["echo.jar", "echo", ".bundle", "bundle", ".hidden.bundle"] {
            let err = derive_extension_name(filename, "bundle").expect_err("must be rejected");
            assert!(matches!(err, LoadError::InvalidName(_)), "filename {filename}");
        }
    }

    #[test]
    fn loads_builtin_echo_with_manifest_metadata() {
        let dir = tempfile::tempdir().expect("temp dir");
        let record = write_bundle(
            dir.path(),
            "echo-v1.bundle",
            r#"{"version": "1.4.0", "configuration": {"mode": "loud"}}"#,
        );

        let loaded = loader().load(&record).expect("echo loads");
        assert_eq!(loaded.name(), "echo");
        assert_eq!(loaded.metadata().version, "1.4.0");
        assert_eq!(loaded.metadata().factory, "echo");
        assert!(!loaded.metadata().description.is_empty());
        assert!(loaded.is_enabled());
        assert_eq!(loaded.configuration()["mode"], json!("loud"));
    }

    #[test]
    fn unknown_factory_is_a_load_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let record = write_bundle(dir.path(), "weather.bundle", "");
        let err = loader().load(&record).expect_err("unknown factory");
        assert!(matches!(err, LoadError::UnknownFactory { ref factory, .. } if factory == "weather"));
    }

    #[test]
    fn initialize_failure_is_a_load_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let record = write_bundle(dir.path(), "broken.bundle", r#"{"factory": "failing"}"#);
        let err = loader().load(&record).expect_err("initialize fails");
        assert!(matches!(err, LoadError::Initialize { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("missing api key"));
    }

    #[test]
    fn constructor_panic_is_contained() {
        let dir = tempfile::tempdir().expect("temp dir");
        let record = write_bundle(dir.path(), "boom.bundle", r#"{"factory": "exploding"}"#);
        let err = loader().load(&record).expect_err("constructor panics");
        match err {
            LoadError::Construct { fault, .. } => assert!(fault.panicked()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_bundle_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let record = BundleRecord {
            path: dir.path().join("ghost.bundle"),
            filename: "ghost.bundle".to_string(),
        };
        let err = loader().load(&record).expect_err("missing file");
        assert!(matches!(err, LoadError::Read { .. }));
    }
}
