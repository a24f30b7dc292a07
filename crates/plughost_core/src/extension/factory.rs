//! Built-in extension factory table.
//!
//! Extensions are statically linked into the host and published under a
//! factory id. Bundles select a factory by id; the loader builds a fresh
//! instance per bundle, so instances never share state through the table.

use crate::extension::api::{Extension, ExtensionContext, ExtensionResult};
use crate::extension::builtin;
use crate::extension::manifest::is_valid_extension_id;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Constructor published by one factory.
pub type ExtensionConstructor =
    dyn Fn(&ExtensionContext) -> ExtensionResult<Box<dyn Extension>> + Send + Sync;

/// Registered factory entry.
#[derive(Clone)]
pub struct ExtensionFactory {
    id: String,
    description: String,
    constructor: Arc<ExtensionConstructor>,
}

impl ExtensionFactory {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Description used when a bundle manifest does not declare one.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn construct(
        &self,
        context: &ExtensionContext,
    ) -> ExtensionResult<Box<dyn Extension>> {
        (self.constructor)(context)
    }
}

impl Debug for ExtensionFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionFactory")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Factory table injected into the loader.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFactories {
    entries: BTreeMap<String, ExtensionFactory>,
}

impl ExtensionFactories {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table holding every built-in factory.
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        builtin::register_builtins(&mut factories);
        factories
    }

    /// Registers one factory under a unique id.
    pub fn register<F>(
        &mut self,
        id: &str,
        description: &str,
        constructor: F,
    ) -> Result<(), FactoryError>
    where
        F: Fn(&ExtensionContext) -> ExtensionResult<Box<dyn Extension>> + Send + Sync + 'static,
    {
        let id = id.trim();
        if !is_valid_extension_id(id) {
            return Err(FactoryError::InvalidFactoryId(id.to_string()));
        }
        if self.entries.contains_key(id) {
            return Err(FactoryError::DuplicateFactoryId(id.to_string()));
        }

        self.insert(id, description, constructor);
        Ok(())
    }

    /// Inserts without validation; callers guarantee a valid, unused id.
    pub(crate) fn insert<F>(&mut self, id: &str, description: &str, constructor: F)
    where
        F: Fn(&ExtensionContext) -> ExtensionResult<Box<dyn Extension>> + Send + Sync + 'static,
    {
        self.entries.insert(
            id.to_string(),
            ExtensionFactory {
                id: id.to_string(),
                description: description.trim().to_string(),
                constructor: Arc::new(constructor),
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&ExtensionFactory> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Factory registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    InvalidFactoryId(String),
    DuplicateFactoryId(String),
}

impl Display for FactoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFactoryId(value) => write!(f, "factory id is invalid: {value}"),
            Self::DuplicateFactoryId(value) => write!(f, "factory id already registered: {value}"),
        }
    }
}

impl Error for FactoryError {}
