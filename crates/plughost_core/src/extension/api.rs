//! Extension-author contract.
//!
//! # Responsibility
//! - Define the hooks every extension implements.
//! - Define the per-instance context handed to an extension when it is built.
//! - Contain panics raised by extension code so they surface as faults.
//!
//! # Invariants
//! - Hooks take `&self`. The host never serializes calls into one instance;
//!   an extension that needs mutual exclusion must lock internally.
//! - A panic inside any hook is converted to an [`ExtensionFault`] and never
//!   unwinds into host code.

use crate::logging::panic_payload_summary;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Per-extension configuration map.
pub type ConfigMap = Map<String, Value>;

/// Execution parameters passed to [`Extension::execute`].
pub type Params = Map<String, Value>;

pub type ExtensionResult<T> = Result<T, ExtensionFault>;

/// Failure raised by extension code, either returned or caught as a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFault {
    message: String,
    panicked: bool,
}

impl ExtensionFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            panicked: false,
        }
    }

    fn from_panic(message: String) -> Self {
        Self {
            message,
            panicked: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the fault was produced by a caught panic.
    pub fn panicked(&self) -> bool {
        self.panicked
    }
}

impl Display for ExtensionFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.panicked {
            write!(f, "extension panicked: {}", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl Error for ExtensionFault {}

impl From<String> for ExtensionFault {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ExtensionFault {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Construction context for one extension instance.
///
/// Each instance receives its own context; nothing in it is shared with other
/// instances or with the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionContext {
    name: String,
    version: String,
    configuration: ConfigMap,
}

impl ExtensionContext {
    pub fn new(name: impl Into<String>, version: impl Into<String>, configuration: ConfigMap) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            configuration,
        }
    }

    /// Registry name derived from the bundle filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Initial configuration declared by the bundle manifest.
    pub fn configuration(&self) -> &ConfigMap {
        &self.configuration
    }
}

/// Runtime unit of extensibility.
///
/// Only [`Extension::execute`] is required; the remaining hooks default to
/// no-ops.
pub trait Extension: Send + Sync {
    /// Runs once after construction, before the instance is registered.
    fn initialize(&self, _context: &ExtensionContext) -> ExtensionResult<()> {
        Ok(())
    }

    /// Handles one execution request.
    fn execute(&self, params: &Params) -> ExtensionResult<Value>;

    /// Validates and applies a replacement configuration map.
    ///
    /// Returning a fault keeps the previous configuration in place.
    fn configure(&self, _configuration: &ConfigMap) -> ExtensionResult<()> {
        Ok(())
    }

    /// Runs once before the instance becomes unreachable.
    fn shutdown(&self) {}
}

/// Runs extension code, converting a panic into an [`ExtensionFault`].
pub(crate) fn guarded<T>(call: impl FnOnce() -> ExtensionResult<T>) -> ExtensionResult<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(ExtensionFault::from_panic(panic_payload_summary(
            payload.as_ref(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{guarded, ExtensionContext, ExtensionFault};
    use serde_json::json;

    #[test]
    fn guarded_passes_through_results() {
        assert_eq!(guarded(|| Ok(7)).expect("ok result"), 7);

        let fault = guarded::<()>(|| Err("bad input".into())).expect_err("fault result");
        assert_eq!(fault.message(), "bad input");
        assert!(!fault.panicked());
    }

    #[test]
    fn guarded_converts_panics_to_faults() {
        let fault = guarded::<()>(|| panic!("exploded\nloudly")).expect_err("panic must fault");
        assert!(fault.panicked());
        assert_eq!(fault.message(), "exploded loudly");
        assert!(fault.to_string().starts_with("extension panicked"));
    }

    #[test]
    fn fault_display_uses_message() {
        assert_eq!(ExtensionFault::new("nope").to_string(), "nope");
    }

    #[test]
    fn context_exposes_identity_and_configuration() {
        let configuration = json!({"greeting": "hi"})
            .as_object()
            .cloned()
            .expect("object literal");
        let context = ExtensionContext::new("echo", "1.0.0", configuration);
        assert_eq!(context.name(), "echo");
        assert_eq!(context.version(), "1.0.0");
        assert_eq!(context.configuration()["greeting"], json!("hi"));
    }
}
