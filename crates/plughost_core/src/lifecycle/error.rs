//! Lifecycle operation error taxonomy.

use crate::bundle::store::BundleStoreError;
use crate::extension::api::ExtensionFault;
use crate::extension::loader::LoadError;
use crate::lifecycle::result::ErrorKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure of one controller operation.
#[derive(Debug)]
pub enum LifecycleError {
    /// Operation referenced an unregistered name.
    NotFound(String),
    /// Execute attempted on a disabled extension.
    Disabled(String),
    Load(LoadError),
    Io(BundleStoreError),
    /// Fault raised inside extension code other than loading.
    Execution { name: String, fault: ExtensionFault },
    /// Anything else, including panics outside extension code.
    Internal(String),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Disabled(_) => ErrorKind::Disabled,
            Self::Load(_) => ErrorKind::LoadFailed,
            Self::Io(_) => ErrorKind::Io,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "extension not found: {name}"),
            Self::Disabled(name) => write!(f, "extension is disabled: {name}"),
            Self::Load(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Execution { name, fault } => {
                write!(f, "extension `{name}` failed: {fault}")
            }
            Self::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Execution { fault, .. } => Some(fault),
            Self::NotFound(_) | Self::Disabled(_) | Self::Internal(_) => None,
        }
    }
}

impl From<LoadError> for LifecycleError {
    fn from(value: LoadError) -> Self {
        Self::Load(value)
    }
}

impl From<BundleStoreError> for LifecycleError {
    fn from(value: BundleStoreError) -> Self {
        Self::Io(value)
    }
}
