//! Managed bundle directory.
//!
//! # Responsibility
//! - List, store, and delete bundle artifacts in one directory.
//! - Stage incoming artifacts so a failed copy or load leaves the directory
//!   untouched.
//!
//! # Invariants
//! - Only files named `<stem>.<suffix>` (not hidden) count as bundles.
//! - A write lands via temp file + rename; readers never see partial files.
//! - The directory is created on first use.

use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STAGING_PREFIX: &str = ".staging-";
const STAGING_SUFFIX: &str = ".partial";

/// Physical bundle artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    /// Location of the bytes; a staging path before commit.
    pub path: PathBuf,
    /// Filename the artifact is (or will be) stored under.
    pub filename: String,
}

/// Incoming artifact handed to install or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleSource {
    Path(PathBuf),
    Bytes { filename: String, bytes: Vec<u8> },
}

impl BundleSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Base filename of the artifact, when it has a UTF-8 one.
    pub fn filename(&self) -> Option<String> {
        match self {
            Self::Path(path) => path
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string),
            Self::Bytes { filename, .. } => Some(filename.trim().to_string()),
        }
    }
}

impl Display for BundleSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes { filename, bytes } => write!(f, "{filename} ({} bytes)", bytes.len()),
        }
    }
}

/// Artifact copied into the managed directory but not yet visible under its
/// final name. Dropping it removes the staged copy.
#[derive(Debug)]
pub struct StagedBundle {
    temp: NamedTempFile,
    target: PathBuf,
    filename: String,
}

impl StagedBundle {
    /// Record pointing at the staged bytes under the final filename.
    pub fn record(&self) -> BundleRecord {
        BundleRecord {
            path: self.temp.path().to_path_buf(),
            filename: self.filename.clone(),
        }
    }

    /// Atomically renames the staged copy over the final filename.
    pub fn commit(self) -> Result<BundleRecord, BundleStoreError> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|err| BundleStoreError::Io {
                op: "persist",
                path: target.clone(),
                source: err.error,
            })?;
        Ok(BundleRecord {
            path: target,
            filename: self.filename,
        })
    }
}

/// Directory-backed artifact store.
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
    suffix: String,
}

impl BundleStore {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Filename an extension's bundle is stored under.
    pub fn canonical_filename(&self, name: &str) -> String {
        format!("{name}.{}", self.suffix)
    }

    /// Whether `filename` names an installable bundle.
    pub fn is_bundle_filename(&self, filename: &str) -> bool {
        !filename.starts_with('.')
            && !filename.contains(['/', '\\'])
            && filename
                .strip_suffix(self.suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .map(|stem| !stem.is_empty())
                .unwrap_or(false)
    }

    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    fn ensure_dir(&self) -> Result<(), BundleStoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| BundleStoreError::Io {
            op: "create_dir",
            path: self.dir.clone(),
            source,
        })
    }

    fn check_filename(&self, filename: &str) -> Result<(), BundleStoreError> {
        if self.is_bundle_filename(filename) {
            Ok(())
        } else {
            Err(BundleStoreError::InvalidFilename(filename.to_string()))
        }
    }

    /// Lists installable bundles sorted by filename.
    pub fn list_artifacts(&self) -> Result<Vec<BundleRecord>, BundleStoreError> {
        self.ensure_dir()?;
        let entries = std::fs::read_dir(&self.dir).map_err(|source| BundleStoreError::Io {
            op: "read_dir",
            path: self.dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file && self.is_bundle_filename(&filename) {
                records.push(BundleRecord {
                    path: entry.path(),
                    filename,
                });
            }
        }
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    /// Copies `source` into a staging file destined for `filename`.
    ///
    /// # Errors
    /// - `InvalidFilename` when `filename` is not a bundle filename.
    /// - `Io` when the directory, source, or staging file cannot be used.
    pub fn stage(
        &self,
        source: &BundleSource,
        filename: &str,
    ) -> Result<StagedBundle, BundleStoreError> {
        self.check_filename(filename)?;
        self.ensure_dir()?;

        let mut temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|source| BundleStoreError::Io {
                op: "create_staging",
                path: self.dir.clone(),
                source,
            })?;

        match source {
            BundleSource::Path(path) => {
                let mut input = File::open(path).map_err(|source| BundleStoreError::Io {
                    op: "open_source",
                    path: path.clone(),
                    source,
                })?;
                std::io::copy(&mut input, temp.as_file_mut()).map_err(|source| {
                    BundleStoreError::Io {
                        op: "copy",
                        path: path.clone(),
                        source,
                    }
                })?;
            }
            BundleSource::Bytes { bytes, .. } => {
                temp.write_all(bytes).map_err(|source| BundleStoreError::Io {
                    op: "write",
                    path: temp.path().to_path_buf(),
                    source,
                })?;
            }
        }
        temp.as_file()
            .sync_all()
            .map_err(|source| BundleStoreError::Io {
                op: "sync",
                path: temp.path().to_path_buf(),
                source,
            })?;

        Ok(StagedBundle {
            target: self.path_of(filename),
            filename: filename.to_string(),
            temp,
        })
    }

    /// Copies `source` into the directory under its own filename,
    /// overwriting an existing file of that name.
    pub fn store(&self, source: &BundleSource) -> Result<String, BundleStoreError> {
        let filename = source.filename().ok_or(BundleStoreError::MissingFilename)?;
        let record = self.stage(source, &filename)?.commit()?;
        info!(
            "event=bundle_store module=bundle_store status=ok filename={}",
            record.filename
        );
        Ok(record.filename)
    }

    /// Removes one bundle. A missing file is `Ok(false)`.
    pub fn delete(&self, filename: &str) -> Result<bool, BundleStoreError> {
        self.check_filename(filename)?;
        let path = self.path_of(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(
                    "event=bundle_delete module=bundle_store status=ok filename={}",
                    filename
                );
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => {
                warn!(
                    "event=bundle_delete module=bundle_store status=error filename={} error={}",
                    filename, source
                );
                Err(BundleStoreError::Io {
                    op: "remove",
                    path,
                    source,
                })
            }
        }
    }
}

/// Bundle directory errors.
#[derive(Debug)]
pub enum BundleStoreError {
    InvalidFilename(String),
    MissingFilename,
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for BundleStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFilename(value) => write!(f, "not a bundle filename: `{value}`"),
            Self::MissingFilename => write!(f, "bundle source has no usable filename"),
            Self::Io { op, path, source } => {
                write!(f, "bundle {op} failed for `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for BundleStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::InvalidFilename(_) | Self::MissingFilename => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BundleSource, BundleStore, BundleStoreError};

    fn store_in(dir: &std::path::Path) -> BundleStore {
        BundleStore::new(dir.join("plugins"), "bundle")
    }

    #[test]
    fn recognizes_bundle_filenames() {
        let store = BundleStore::new("plugins", "bundle");
        assert!(store.is_bundle_filename("echo.bundle"));
        assert!(store.is_bundle_filename("echo-v1.bundle"));
        assert!(!store.is_bundle_filename("echo.jar"));
        assert!(!store.is_bundle_filename(".bundle"));
        assert!(!store.is_bundle_filename(".staging-abc.partial"));
        assert!(!store.is_bundle_filename("../echo.bundle"));
        assert_eq!(store.canonical_filename("echo"), "echo.bundle");
    }

    #[test]
    fn creates_directory_lazily() {
        let root = tempfile::tempdir().expect("temp dir");
        let store = store_in(root.path());
        assert!(!store.dir().exists());
        assert!(store.list_artifacts().expect("list").is_empty());
        assert!(store.dir().is_dir());
    }

    #[test]
    fn dropped_stage_leaves_directory_unchanged() {
        let root = tempfile::tempdir().expect("temp dir");
        let store = store_in(root.path());
        let staged = store
            .stage(&BundleSource::from_bytes("echo.bundle", "{}"), "echo.bundle")
            .expect("stage");
        assert!(staged.record().path.exists());
        drop(staged);

        let leftovers = std::fs::read_dir(store.dir()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn stage_rejects_non_bundle_target() {
        let root = tempfile::tempdir().expect("temp dir");
        let store = store_in(root.path());
        let err = store
            .stage(&BundleSource::from_bytes("echo.jar", "{}"), "echo.jar")
            .expect_err("must reject");
        assert!(matches!(err, BundleStoreError::InvalidFilename(_)));
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let root = tempfile::tempdir().expect("temp dir");
        let store = store_in(root.path());
        assert!(!store.delete("ghost.bundle").expect("missing is ok"));
    }

    #[test]
    fn source_filename_comes_from_path_or_bytes() {
        assert_eq!(
            BundleSource::from_path("/tmp/in/echo-v1.bundle").filename(),
            Some("echo-v1.bundle".to_string())
        );
        assert_eq!(
            BundleSource::from_bytes(" echo.bundle ", Vec::new()).filename(),
            Some("echo.bundle".to_string())
        );
    }
}
