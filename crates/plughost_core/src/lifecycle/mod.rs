//! Lifecycle orchestration over loader, store, registry, and event bus.

pub mod controller;
pub mod error;
pub mod result;
