//! Directory-backed bundle artifacts.

pub mod store;
