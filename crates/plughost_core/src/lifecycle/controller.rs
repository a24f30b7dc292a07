//! Extension lifecycle orchestration.
//!
//! # Responsibility
//! - Expose install / uninstall / update / enable / disable / execute and the
//!   configuration accessors as boundary operations returning
//!   [`OperationResult`].
//! - Drive the bundle store and loader, own the registry, and publish one
//!   event per state change.
//!
//! # Invariants
//! - No error or panic escapes an operation; failures become results.
//! - A failed install leaves the bundle directory and registry unchanged.
//! - A replaced or removed instance is shut down before it is dropped.
//! - `update` is two independent steps; a failed install step leaves the
//!   name absent.
//! - Executions are not serialized per extension.
//! - Bundle-file commits and deletes happen under the same lock as the
//!   registry change that follows them, so the registered instance of a name
//!   always matches its file on disk. Shutdown hooks run under that lock;
//!   events are published after it is released.

use crate::bundle::store::{BundleRecord, BundleSource, BundleStore, BundleStoreError};
use crate::config::HostConfig;
use crate::events::bus::{
    EventBus, ExtensionEvent, ExtensionEventKind, ExtensionListener, ListenerId,
};
use crate::extension::api::{ConfigMap, Params};
use crate::extension::factory::ExtensionFactories;
use crate::extension::loader::{ExtensionLoader, LoadError};
use crate::extension::registry::{ExtensionInfo, ExtensionRegistry, LoadedExtension};
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::result::{ErrorKind, OperationResult};
use crate::logging::panic_payload_summary;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Outcome of loading one bundle found by [`LifecycleController::load_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub filename: String,
    pub result: OperationResult,
}

/// Owns the extension registry and every operation that changes it.
pub struct LifecycleController {
    store: BundleStore,
    loader: ExtensionLoader,
    registry: ExtensionRegistry,
    events: EventBus,
    commit_lock: Mutex<()>,
}

/// Instance shut down under the commit lock, announced after its release.
struct Retired {
    extension: Arc<LoadedExtension>,
    fault: Option<LifecycleError>,
}

impl LifecycleController {
    pub fn new(config: &HostConfig, factories: ExtensionFactories) -> Self {
        Self::from_parts(
            BundleStore::new(config.bundle_dir.clone(), config.bundle_suffix.trim()),
            factories,
        )
    }

    /// Builds a controller around an existing store; the loader shares its suffix.
    pub fn from_parts(store: BundleStore, factories: ExtensionFactories) -> Self {
        let loader = ExtensionLoader::new(factories, store.suffix());
        Self {
            store,
            loader,
            registry: ExtensionRegistry::new(),
            events: EventBus::new(),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: ExtensionListener + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Stores and loads one bundle, replacing any extension of the same name.
    pub fn install(&self, source: BundleSource) -> OperationResult {
        let subject = source.filename().unwrap_or_default();
        self.boundary("install", &subject, || {
            let info = self.try_install(&source)?;
            Ok(OperationResult::success_with_data(
                format!("installed {}", info.name),
                to_data(&info)?,
            ))
        })
    }

    /// Shuts down, unregisters, and deletes the bundle of `name`.
    pub fn uninstall(&self, name: &str) -> OperationResult {
        self.boundary("uninstall", name, || {
            let info = self.try_uninstall(name)?;
            Ok(OperationResult::success(format!("uninstalled {}", info.name)))
        })
    }

    /// Uninstalls `name`, then installs `source`.
    ///
    /// Not atomic: when the install step fails, `name` stays uninstalled.
    pub fn update(&self, name: &str, source: BundleSource) -> OperationResult {
        self.boundary("update", name, || {
            self.try_uninstall(name)?;
            let info = self.try_install(&source)?;
            Ok(OperationResult::success_with_data(
                format!("updated {name}"),
                to_data(&info)?,
            ))
        })
    }

    pub fn enable(&self, name: &str) -> OperationResult {
        self.boundary("enable", name, || {
            self.set_enabled(name, true)?;
            Ok(OperationResult::success(format!("enabled {name}")))
        })
    }

    pub fn disable(&self, name: &str) -> OperationResult {
        self.boundary("disable", name, || {
            self.set_enabled(name, false)?;
            Ok(OperationResult::success(format!("disabled {name}")))
        })
    }

    /// Runs the extension's execute hook when it is registered and enabled.
    ///
    /// The enabled flag is read once at dispatch; a concurrent disable does
    /// not interrupt a call already in flight.
    pub fn execute(&self, name: &str, params: Params) -> OperationResult {
        self.boundary("execute", name, || {
            let extension = self.require(name)?;
            if !extension.is_enabled() {
                return Err(LifecycleError::Disabled(name.to_string()));
            }

            match extension.execute(&params) {
                Ok(value) => {
                    self.publish(
                        extension.info(),
                        ExtensionEventKind::Executed {
                            result: value.clone(),
                        },
                    );
                    Ok(OperationResult::success_with_data(
                        format!("executed {name}"),
                        value,
                    ))
                }
                Err(fault) => {
                    let err = LifecycleError::Execution {
                        name: name.to_string(),
                        fault,
                    };
                    self.publish_error(&extension, &err);
                    Err(err)
                }
            }
        })
    }

    pub fn get_configuration(&self, name: &str) -> OperationResult {
        self.boundary("get_configuration", name, || {
            let extension = self.require(name)?;
            Ok(OperationResult::success_with_data(
                format!("configuration of {name}"),
                Value::Object(extension.configuration()),
            ))
        })
    }

    /// Replaces the whole configuration map once the extension accepts it.
    pub fn set_configuration(&self, name: &str, configuration: ConfigMap) -> OperationResult {
        self.boundary("set_configuration", name, || {
            let extension = self.require(name)?;
            if let Err(fault) = extension.replace_configuration(configuration) {
                let err = LifecycleError::Execution {
                    name: name.to_string(),
                    fault,
                };
                self.publish_error(&extension, &err);
                return Err(err);
            }
            Ok(OperationResult::success(format!("configured {name}")))
        })
    }

    /// Registered extensions in registration order.
    pub fn list(&self) -> Vec<ExtensionInfo> {
        self.registry
            .list()
            .iter()
            .map(|extension| extension.info())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<ExtensionInfo> {
        self.registry.get(name).map(|extension| extension.info())
    }

    /// Installs every bundle already present in the managed directory.
    ///
    /// Bundles stored under a non-canonical filename are renamed to
    /// `<name>.<suffix>`. When several files derive the same name only one
    /// is loaded: the canonical file if present, otherwise the last one in
    /// filename order. The others are reported as shadowed and left on disk.
    /// One failing bundle does not stop the scan.
    ///
    /// # Errors
    /// - `Io` when the directory cannot be listed.
    pub fn load_all(&self) -> Result<Vec<ScanEntry>, LifecycleError> {
        let started_at = Instant::now();
        let records = self.store.list_artifacts()?;
        let winners = self.scan_winners(&records);

        let entries: Vec<ScanEntry> = records
            .into_iter()
            .map(|record| {
                let result = self.boundary("scan", &record.filename, || {
                    let name = self.loader.derive_name(&record.filename)?;
                    if let Some(winner) = winners.get(&name) {
                        if *winner != record.filename {
                            return Err(LoadError::Shadowed {
                                name,
                                winner: winner.clone(),
                            }
                            .into());
                        }
                    }
                    let info = self.try_adopt(&record, &name)?;
                    Ok(OperationResult::success_with_data(
                        format!("loaded {}", info.name),
                        to_data(&info)?,
                    ))
                });
                ScanEntry {
                    filename: record.filename,
                    result,
                }
            })
            .collect();

        let failed = entries
            .iter()
            .filter(|entry| !entry.result.is_success())
            .count();
        info!(
            "event=extension_load_all module=lifecycle status=ok found={} failed={} duration_ms={}",
            entries.len(),
            failed,
            started_at.elapsed().as_millis()
        );
        Ok(entries)
    }

    /// Shuts down and unregisters every extension. Bundle files are kept.
    ///
    /// Returns the number of extensions that were registered.
    pub fn shutdown(&self) -> usize {
        let retired: Vec<Retired> = {
            let _commit = self.lock_commits();
            self.registry
                .drain()
                .into_iter()
                .map(|extension| self.shut_down(extension))
                .collect()
        };
        let count = retired.len();
        for entry in retired {
            self.announce(entry);
        }
        info!(
            "event=extension_host_shutdown module=lifecycle status=ok count={}",
            count
        );
        count
    }

    fn try_install(&self, source: &BundleSource) -> Result<ExtensionInfo, LifecycleError> {
        let incoming = source
            .filename()
            .ok_or(BundleStoreError::MissingFilename)?;
        let name = self.loader.derive_name(&incoming)?;
        let staged = self
            .store
            .stage(source, &self.store.canonical_filename(&name))?;

        // Dropping `staged` on a load error removes the staged copy.
        let loaded = Arc::new(self.loader.load(&staged.record())?);
        let committed = {
            let _commit = self.lock_commits();
            staged.commit().map(|_| self.swap_in(&loaded))
        };
        match committed {
            Ok(retired) => Ok(self.announce_swap(retired, &loaded)),
            Err(err) => {
                if let Err(fault) = loaded.shutdown() {
                    warn!(
                        "event=extension_shutdown module=lifecycle status=error name={} error={}",
                        name, fault
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Loads a bundle already in the managed directory.
    fn try_adopt(
        &self,
        record: &BundleRecord,
        name: &str,
    ) -> Result<ExtensionInfo, LifecycleError> {
        if record.filename == self.store.canonical_filename(name) {
            let loaded = Arc::new(self.loader.load(record)?);
            let retired = {
                let _commit = self.lock_commits();
                self.swap_in(&loaded)
            };
            return Ok(self.announce_swap(retired, &loaded));
        }

        let info = self.try_install(&BundleSource::Path(record.path.clone()))?;
        if let Err(err) = self.store.delete(&record.filename) {
            debug!(
                "event=bundle_normalize module=lifecycle status=error filename={} error={}",
                record.filename, err
            );
        }
        Ok(info)
    }

    /// Maps each derived name to the one filename `load_all` will load.
    fn scan_winners(&self, records: &[BundleRecord]) -> HashMap<String, String> {
        let mut winners: HashMap<String, String> = HashMap::new();
        for record in records {
            let Ok(name) = self.loader.derive_name(&record.filename) else {
                continue;
            };
            let canonical = self.store.canonical_filename(&name);
            let winner = winners
                .entry(name)
                .or_insert_with(|| record.filename.clone());
            if *winner != canonical {
                *winner = record.filename.clone();
            }
        }
        winners
    }

    fn try_uninstall(&self, name: &str) -> Result<ExtensionInfo, LifecycleError> {
        let retired = {
            let _commit = self.lock_commits();
            let extension = self.require(name)?;
            let retired = self.shut_down(extension);
            self.registry.remove(name);

            let filename = self.store.canonical_filename(name);
            if let Err(err) = self.store.delete(&filename) {
                warn!(
                    "event=extension_uninstall module=lifecycle status=degraded name={} error={}",
                    name, err
                );
            }
            retired
        };

        let info = retired.extension.info();
        self.announce(retired);
        Ok(info)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), LifecycleError> {
        let extension = self.require(name)?;
        extension.set_enabled(enabled);
        let kind = if enabled {
            ExtensionEventKind::Enabled
        } else {
            ExtensionEventKind::Disabled
        };
        self.publish(extension.info(), kind);
        Ok(())
    }

    fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `loaded`, shutting down the instance it replaces.
    ///
    /// Caller holds the commit lock.
    fn swap_in(&self, loaded: &Arc<LoadedExtension>) -> Option<Retired> {
        let retired = self
            .registry
            .remove(loaded.name())
            .map(|previous| self.shut_down(previous));
        self.registry.put(loaded.clone());
        retired
    }

    /// Publishes the replacement sequence: old `unloaded`, new `loaded`.
    fn announce_swap(&self, retired: Option<Retired>, loaded: &LoadedExtension) -> ExtensionInfo {
        if let Some(retired) = retired {
            self.announce(retired);
        }
        let info = loaded.info();
        self.publish(info.clone(), ExtensionEventKind::Loaded);
        info
    }

    fn shut_down(&self, extension: Arc<LoadedExtension>) -> Retired {
        let fault = extension.shutdown().err().map(|fault| {
            let err = LifecycleError::Execution {
                name: extension.name().to_string(),
                fault,
            };
            warn!(
                "event=extension_shutdown module=lifecycle status=error name={} instance_id={} error={}",
                extension.name(),
                extension.instance_id(),
                err
            );
            err
        });
        Retired { extension, fault }
    }

    fn announce(&self, retired: Retired) {
        if let Some(err) = &retired.fault {
            self.publish_error(&retired.extension, err);
        }
        self.publish(retired.extension.info(), ExtensionEventKind::Unloaded);
    }

    fn require(&self, name: &str) -> Result<Arc<LoadedExtension>, LifecycleError> {
        self.registry
            .get(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))
    }

    fn publish(&self, extension: ExtensionInfo, kind: ExtensionEventKind) {
        let event = ExtensionEvent::new(extension, kind);
        let report = self.events.publish(&event);
        if report.failed > 0 {
            debug!(
                "event=extension_notify module=lifecycle status=partial name={} event_kind={} delivered={} failed={}",
                event.name(),
                event.kind.as_str(),
                report.delivered,
                report.failed
            );
        }
    }

    fn publish_error(&self, extension: &LoadedExtension, err: &LifecycleError) {
        self.publish(
            extension.info(),
            ExtensionEventKind::Error {
                error: err.kind(),
                message: err.to_string(),
            },
        );
    }

    /// Runs one operation, converting errors and panics into a failure result.
    fn boundary<F>(&self, op: &'static str, subject: &str, call: F) -> OperationResult
    where
        F: FnOnce() -> Result<OperationResult, LifecycleError>,
    {
        let started_at = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
            Err(LifecycleError::Internal(format!(
                "operation panicked: {}",
                panic_payload_summary(payload.as_ref())
            )))
        });

        match outcome {
            Ok(result) => {
                info!(
                    "event=extension_{} module=lifecycle status=ok name={} duration_ms={}",
                    op,
                    subject,
                    started_at.elapsed().as_millis()
                );
                result
            }
            Err(err) => {
                let kind = err.kind();
                if matches!(kind, ErrorKind::NotFound | ErrorKind::Disabled) {
                    info!(
                        "event=extension_{} module=lifecycle status=rejected name={} error_kind={} duration_ms={}",
                        op,
                        subject,
                        kind.as_str(),
                        started_at.elapsed().as_millis()
                    );
                } else {
                    warn!(
                        "event=extension_{} module=lifecycle status=error name={} error_kind={} duration_ms={} error={}",
                        op,
                        subject,
                        kind.as_str(),
                        started_at.elapsed().as_millis(),
                        err
                    );
                }
                OperationResult::failure(&err)
            }
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, LifecycleError> {
    serde_json::to_value(value).map_err(|err| LifecycleError::Internal(err.to_string()))
}
