//! Extension contracts, loading, and the in-process registry.
//!
//! Extensions are statically linked behind a factory table. A bundle on disk
//! selects a factory and carries metadata plus initial configuration; the
//! loader builds a fresh instance per bundle inside its own context.

pub mod api;
pub mod builtin;
pub mod factory;
pub mod loader;
pub mod manifest;
pub mod registry;
