//! # Native Bridge - plugin service lifecycle and invocation bridge
//!
//! Lets a sandboxed front-end call native services ("plugins") hosted in a
//! privileged process over an asynchronous message channel:
//! - Lazy, memoized two-phase plugin lifecycle (configure, then initialize)
//! - Two plugin generations behind one invocation contract
//! - Progress + terminal result envelopes with cycle-safe payloads
//! - Sandboxed resolution of application URLs to files
//!
//! ## Architecture
//!
//! ```text
//!   front-end ── exec frame ──▶ ┌──────────┐   ┌─────────────────┐
//!   (window)                    │  Bridge  │──▶│ ServiceRegistry │
//!       ▲                       └──────────┘   │  record ─ init  │
//!       │                                      └───────┬─────────┘
//!       │                                              ▼
//!       │                                      ┌─────────────────┐
//!       └──── push frame ◀── CallbackContext ◀─│ Plugin adapter  │
//!                                              └─────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod callback;
pub mod envelope;
pub mod host;
pub mod ipc;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod types;

// Internal utilities
pub mod observability;

pub use bridge::{Bridge, ExecRequest};
pub use callback::CallbackContext;
pub use envelope::{Payload, PluginResult, Status};
pub use plugin::{ExecVerdict, LegacyMapPlugin, PluginError, PluginModule, ServicePlugin};
pub use registry::{ModuleCatalog, ServiceRegistry};
pub use types::{Config, Error, IpcConfig, Result};
