//! Plugin shapes and their uniform invocation contract.
//!
//! Two generations of plugins coexist:
//! - [`LegacyMapPlugin`]: a map from action name to an async function. No
//!   progress support; deprecated.
//! - [`ServicePlugin`]: a single entry point driving the callback context
//!   itself, with optional `configure` / `initialize` lifecycle hooks.
//!
//! The generation is fixed once, when a module is wrapped in
//! [`PluginModule`]; the adapter never inspects shapes per call.

pub mod adapter;
pub mod context;
pub mod legacy;

pub use adapter::{invoke, Outcome, Target};
pub use context::{
    ConfigContext, ConfigureAccumulator, CustomScheme, InitContext, PluginContext,
    SchemePrivileges,
};
pub use legacy::LegacyMapPlugin;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::callback::CallbackContext;
use crate::envelope::Payload;

// =============================================================================
// Plugin errors and verdicts
// =============================================================================

/// Failure reported by a plugin. Carries an arbitrary payload as the reason.
#[derive(Debug, Clone)]
pub struct PluginError {
    reason: Payload,
}

impl PluginError {
    pub fn new(reason: impl Into<Payload>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &Payload {
        &self.reason
    }

    pub fn into_reason(self) -> Payload {
        self.reason
    }

    /// Text form of the reason, used in logs and bridge-side error messages.
    pub fn message(&self) -> String {
        match &self.reason {
            Payload::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for PluginError {}

impl From<&str> for PluginError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PluginError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<crate::types::Error> for PluginError {
    fn from(value: crate::types::Error) -> Self {
        Self::new(Payload::from(value.to_payload()))
    }
}

/// How a modern plugin's entry point settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecVerdict {
    /// The plugin drove the callback context to completion (`true`).
    Handled,
    /// The plugin has no such action (`false`).
    Unhandled,
    /// Anything else; reported as an unexpected result.
    Unexpected(Value),
}

impl From<bool> for ExecVerdict {
    fn from(handled: bool) -> Self {
        if handled {
            ExecVerdict::Handled
        } else {
            ExecVerdict::Unhandled
        }
    }
}

impl From<Value> for ExecVerdict {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(handled) => handled.into(),
            other => ExecVerdict::Unexpected(other),
        }
    }
}

// =============================================================================
// Modern plugin shape
// =============================================================================

/// Single-entry-point plugin.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Runs before the host is ready. Declare privileged schemes, default
    /// protocols and partitions here.
    fn configure(&self, _ctx: &mut ConfigContext<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Runs once, after the host is ready and before the first action.
    async fn initialize(&self, _ctx: InitContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Execute `action`. Results go through `ctx`; the verdict only says
    /// whether the action exists.
    async fn exec(
        &self,
        action: &str,
        args: Vec<Value>,
        ctx: CallbackContext,
    ) -> Result<ExecVerdict, PluginError>;
}

// =============================================================================
// Loaded module
// =============================================================================

/// A plugin module, tagged with its generation.
#[derive(Clone)]
pub enum PluginModule {
    Legacy(Arc<LegacyMapPlugin>),
    Router(Arc<dyn ServicePlugin>),
}

impl PluginModule {
    pub fn legacy(plugin: LegacyMapPlugin) -> Self {
        PluginModule::Legacy(Arc::new(plugin))
    }

    pub fn router(plugin: impl ServicePlugin + 'static) -> Self {
        PluginModule::Router(Arc::new(plugin))
    }

    pub fn generation(&self) -> &'static str {
        match self {
            PluginModule::Legacy(_) => "legacy",
            PluginModule::Router(_) => "router",
        }
    }

    /// Configure phase. Legacy modules have none.
    pub(crate) fn configure(&self, ctx: &mut ConfigContext<'_>) -> Result<(), PluginError> {
        match self {
            PluginModule::Legacy(_) => Ok(()),
            PluginModule::Router(plugin) => plugin.configure(ctx),
        }
    }

    /// Initialize phase. Legacy modules get their `init` hook, if any.
    pub(crate) async fn initialize(&self, ctx: InitContext) -> Result<(), PluginError> {
        match self {
            PluginModule::Legacy(plugin) => plugin.init(ctx).await,
            PluginModule::Router(plugin) => plugin.initialize(ctx).await,
        }
    }
}

impl fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginModule::Legacy(plugin) => f.debug_tuple("Legacy").field(plugin).finish(),
            PluginModule::Router(_) => f.debug_tuple("Router").finish(),
        }
    }
}
