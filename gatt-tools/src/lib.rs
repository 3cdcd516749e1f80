//! Shared plumbing for the gatt-tools binaries.

pub mod config;
pub mod display;
pub mod notify;
