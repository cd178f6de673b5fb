//! Capability-scoped contexts handed to plugins during their lifecycle.
//!
//! Both contexts expose the same metadata (package name, scheme, hostname,
//! plugin variables). [`ConfigContext`] adds pre-ready declarations into a
//! shared [`ConfigureAccumulator`]; [`InitContext`] adds the service loader
//! and the host handles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::host::{HostApp, HostWindow};
use crate::registry::{ServiceHandle, ServiceLoader};
use crate::types::Result;

/// Variable holding the application's package id.
pub const PACKAGE_NAME_VARIABLE: &str = "PACKAGE_NAME";

// =============================================================================
// Custom schemes
// =============================================================================

/// Privileges granted to a custom scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemePrivileges {
    pub standard: bool,
    pub secure: bool,
    pub bypass_csp: bool,
    pub allow_service_workers: bool,
    pub support_fetch_api: bool,
    pub cors_enabled: bool,
    pub stream: bool,
    pub code_cache: bool,
}

/// A scheme to register as privileged before the host is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomScheme {
    pub scheme: String,
    #[serde(default)]
    pub privileges: SchemePrivileges,
}

impl CustomScheme {
    pub fn new(scheme: impl Into<String>, privileges: SchemePrivileges) -> Self {
        Self {
            scheme: scheme.into(),
            privileges,
        }
    }

    /// Standard + secure, the privileges the application scheme itself gets.
    pub fn standard_secure(scheme: impl Into<String>) -> Self {
        Self::new(
            scheme,
            SchemePrivileges {
                standard: true,
                secure: true,
                ..SchemePrivileges::default()
            },
        )
    }
}

// =============================================================================
// Configure accumulator
// =============================================================================

/// Everything plugins declared during the configure phase.
#[derive(Debug, Clone, Default)]
pub struct ConfigureAccumulator {
    schemes: BTreeMap<String, CustomScheme>,
    default_protocols: Vec<String>,
    partitions: BTreeSet<String>,
}

impl ConfigureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last write wins, with a warning.
    pub fn register_scheme(&mut self, custom: CustomScheme) {
        if self.schemes.contains_key(&custom.scheme) {
            tracing::warn!("overriding custom scheme '{}'", custom.scheme);
        }
        self.schemes.insert(custom.scheme.clone(), custom);
    }

    /// Ordered, deduplicated.
    pub fn add_default_protocol(&mut self, protocol: impl Into<String>) {
        let protocol = protocol.into();
        if !self.default_protocols.contains(&protocol) {
            self.default_protocols.push(protocol);
        }
    }

    pub fn require_partition(&mut self, partition: impl Into<String>) {
        self.partitions.insert(partition.into());
    }

    pub fn schemes(&self) -> impl Iterator<Item = &CustomScheme> {
        self.schemes.values()
    }

    pub fn scheme(&self, name: &str) -> Option<&CustomScheme> {
        self.schemes.get(name)
    }

    pub fn default_protocols(&self) -> &[String] {
        &self.default_protocols
    }

    pub fn partitions(&self) -> &BTreeSet<String> {
        &self.partitions
    }
}

// =============================================================================
// Contexts
// =============================================================================

/// Metadata every lifecycle context exposes.
#[derive(Debug, Clone)]
pub struct PluginContext {
    variables: Arc<BTreeMap<String, String>>,
    scheme: String,
    hostname: String,
}

impl PluginContext {
    pub fn new(
        variables: Arc<BTreeMap<String, String>>,
        scheme: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            variables,
            scheme: scheme.into(),
            hostname: hostname.into(),
        }
    }

    /// Package id of the application, from the `PACKAGE_NAME` variable.
    pub fn package_name(&self) -> Option<&str> {
        self.variable(PACKAGE_NAME_VARIABLE)
    }

    /// Scheme used to serve embedded resources.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Hostname used to build URLs with [`Self::scheme`].
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// A variable defined when the plugin was added to the application.
    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }
}

/// Context for the configure phase.
#[derive(Debug)]
pub struct ConfigContext<'a> {
    base: PluginContext,
    accumulator: &'a mut ConfigureAccumulator,
}

impl<'a> ConfigContext<'a> {
    pub fn new(base: PluginContext, accumulator: &'a mut ConfigureAccumulator) -> Self {
        Self { base, accumulator }
    }

    pub fn register_scheme_as_privileged(&mut self, custom: CustomScheme) {
        self.accumulator.register_scheme(custom);
    }

    /// Ask the host to become the OS default handler for `protocol`.
    pub fn register_default_protocol(&mut self, protocol: impl Into<String>) {
        self.accumulator.add_default_protocol(protocol);
    }

    /// Make the application scheme available on an extra session partition.
    pub fn require_partition(&mut self, partition: impl Into<String>) {
        self.accumulator.require_partition(partition);
    }
}

impl Deref for ConfigContext<'_> {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        &self.base
    }
}

/// Context for the initialize phase.
#[derive(Clone)]
pub struct InitContext {
    base: PluginContext,
    loader: ServiceLoader,
    window: Option<Arc<dyn HostWindow>>,
    app: Arc<dyn HostApp>,
}

impl InitContext {
    pub fn new(
        base: PluginContext,
        loader: ServiceLoader,
        window: Option<Arc<dyn HostWindow>>,
        app: Arc<dyn HostApp>,
    ) -> Self {
        Self {
            base,
            loader,
            window,
            app,
        }
    }

    /// Look up another service, waiting for its initialization.
    pub async fn get_service(&self, name: &str) -> Result<ServiceHandle> {
        self.loader.get_service(name).await
    }

    pub fn loader(&self) -> &ServiceLoader {
        &self.loader
    }

    /// The application's main window, when the host has one.
    pub fn main_window(&self) -> Option<&Arc<dyn HostWindow>> {
        self.window.as_ref()
    }

    pub fn app(&self) -> &Arc<dyn HostApp> {
        &self.app
    }
}

impl Deref for InitContext {
    type Target = PluginContext;

    fn deref(&self) -> &PluginContext {
        &self.base
    }
}

impl fmt::Debug for InitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext")
            .field("base", &self.base)
            .field("loader", &self.loader)
            .field("window", &self.window.as_ref().map(|w| w.label().to_string()))
            .finish()
    }
}
