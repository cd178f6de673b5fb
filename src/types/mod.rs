//! Core types for the bridge.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (CallbackId, ConnectionId)
//! - **Errors**: The error taxonomy with thiserror derives
//! - **Config**: Configuration structures for the app, services and transport

mod config;
mod errors;
mod ids;

pub use config::{
    AppConfig, Config, IpcConfig, ObservabilityConfig, ServiceEntry, DEFAULT_RESERVED_SCHEMES,
    FILE_SCHEME,
};
pub use errors::{Error, Result};
pub use ids::{CallbackId, ConnectionId};
