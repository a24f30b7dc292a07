//! Lifecycle and execution notifications.

pub mod bus;
