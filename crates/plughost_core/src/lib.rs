//! Core of the plughost extension lifecycle manager.
//! Every lifecycle invariant is enforced here; the CLI only translates.

pub mod bundle;
pub mod config;
pub mod events;
pub mod extension;
pub mod lifecycle;
pub mod logging;

pub use bundle::store::{BundleRecord, BundleSource, BundleStore, BundleStoreError};
pub use config::{ConfigError, HostConfig};
pub use events::bus::{
    EventBus, ExtensionEvent, ExtensionEventKind, ExtensionListener, ListenerId, ListenerResult,
};
pub use extension::api::{
    ConfigMap, Extension, ExtensionContext, ExtensionFault, ExtensionResult, Params,
};
pub use extension::factory::{ExtensionFactories, FactoryError};
pub use extension::loader::{derive_extension_name, ExtensionLoader, LoadError};
pub use extension::registry::{ExtensionInfo, ExtensionRegistry, LoadedExtension};
pub use lifecycle::controller::{LifecycleController, ScanEntry};
pub use lifecycle::error::LifecycleError;
pub use lifecycle::result::{ErrorKind, OperationResult};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
