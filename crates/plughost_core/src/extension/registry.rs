//! Loaded extension handles and the concurrent name-keyed registry.
//!
//! # Responsibility
//! - Own every loaded instance, keyed by extension name.
//! - Keep an insertion-ordered view for enumeration.
//! - Track the per-instance `enabled` flag and configuration map.
//!
//! # Invariants
//! - At most one instance per name; `put` replaces (last write wins).
//! - `list` returns a copy; callers never observe the live backing map.
//! - `shutdown` runs at most once per instance.

use crate::extension::api::{guarded, ConfigMap, Extension, ExtensionResult, Params};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Immutable identity of one loaded instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Factory id the instance was built from.
    pub factory: String,
    /// Distinguishes an instance from the one it replaced.
    pub instance_id: Uuid,
    /// Unix epoch milliseconds at load time.
    pub loaded_at_ms: i64,
}

impl ExtensionMetadata {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        factory: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            factory: factory.into(),
            instance_id: Uuid::new_v4(),
            loaded_at_ms: now_epoch_ms(),
        }
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Caller-facing snapshot of one registered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub enabled: bool,
    pub factory: String,
    pub instance_id: Uuid,
    pub loaded_at_ms: i64,
}

/// Host-side handle around one extension instance.
pub struct LoadedExtension {
    metadata: ExtensionMetadata,
    instance: Box<dyn Extension>,
    enabled: AtomicBool,
    configuration: RwLock<ConfigMap>,
    shut_down: AtomicBool,
}

impl LoadedExtension {
    pub fn new(
        metadata: ExtensionMetadata,
        instance: Box<dyn Extension>,
        configuration: ConfigMap,
        enabled: bool,
    ) -> Self {
        Self {
            metadata,
            instance,
            enabled: AtomicBool::new(enabled),
            configuration: RwLock::new(configuration),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn instance_id(&self) -> Uuid {
        self.metadata.instance_id
    }

    pub fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Sets the enabled flag and returns the previous value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Returns a copy of the current configuration map.
    pub fn configuration(&self) -> ConfigMap {
        self.configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the configuration map after the extension accepts it.
    ///
    /// The write lock is held across the `configure` hook, so the stored map
    /// is always the one most recently accepted by the extension.
    pub fn replace_configuration(&self, configuration: ConfigMap) -> ExtensionResult<()> {
        let mut current = self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guarded(|| self.instance.configure(&configuration))?;
        *current = configuration;
        Ok(())
    }

    /// Invokes the extension's execute hook under panic containment.
    ///
    /// Does not consult the enabled flag; gating belongs to the caller.
    pub fn execute(&self, params: &Params) -> ExtensionResult<Value> {
        guarded(|| self.instance.execute(params))
    }

    /// Runs the shutdown hook once. Later calls return `Ok(false)`.
    pub fn shutdown(&self) -> ExtensionResult<bool> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        guarded(|| {
            self.instance.shutdown();
            Ok(true)
        })
    }

    pub fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            description: self.metadata.description.clone(),
            enabled: self.is_enabled(),
            factory: self.metadata.factory.clone(),
            instance_id: self.metadata.instance_id,
            loaded_at_ms: self.metadata.loaded_at_ms,
        }
    }
}

impl Debug for LoadedExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("metadata", &self.metadata)
            .field("enabled", &self.is_enabled())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

struct Slot {
    /// Registration sequence number; orders `list` and `drain`.
    seq: u64,
    extension: Arc<LoadedExtension>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

impl RegistryState {
    fn ordered(
        slots: impl Iterator<Item = (u64, Arc<LoadedExtension>)>,
    ) -> Vec<Arc<LoadedExtension>> {
        let mut slots: Vec<_> = slots.collect();
        slots.sort_unstable_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, extension)| extension).collect()
    }
}

/// Concurrent catalog of loaded extensions.
///
/// Every operation holds the lock only for a single map update or copy, so
/// extension code never runs under it. `put` and `remove` are hash-map
/// updates; ordering is resolved from sequence numbers when a snapshot is
/// taken.
#[derive(Default)]
pub struct ExtensionRegistry {
    state: RwLock<RegistryState>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces by name, returning the replaced instance.
    ///
    /// A replacement moves the name to the end of the enumeration order.
    pub fn put(&self, extension: Arc<LoadedExtension>) -> Option<Arc<LoadedExtension>> {
        let name = extension.name().to_string();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .entries
            .insert(name, Slot { seq, extension })
            .map(|previous| previous.extension)
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedExtension>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(name)
            .map(|slot| slot.extension.clone())
    }

    /// Removes and returns the instance registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<LoadedExtension>> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .remove(name)
            .map(|slot| slot.extension)
    }

    /// Point-in-time copy of registered instances in insertion order.
    pub fn list(&self) -> Vec<Arc<LoadedExtension>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        RegistryState::ordered(
            state
                .entries
                .values()
                .map(|slot| (slot.seq, slot.extension.clone())),
        )
    }

    /// Removes every instance, returning them in insertion order.
    pub fn drain(&self) -> Vec<Arc<LoadedExtension>> {
        let entries = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut state.entries)
        };
        RegistryState::ordered(
            entries
                .into_values()
                .map(|slot| (slot.seq, slot.extension)),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
