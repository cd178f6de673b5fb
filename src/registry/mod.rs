//! Service registry - lazy, memoized, fault-tolerant service lifecycle.
//!
//! One [`ServiceRecord`] exists per referenced service name. Initialization
//! runs at most once per module: every service backed by the same module,
//! and every concurrent first call, awaits the same shared future. A failed
//! initialization is sticky: the record becomes a stub that answers every
//! later call with the original failure.
//!
//! Lifecycle:
//! 1. [`ServiceRegistry::configure`] - before host readiness, every distinct
//!    module runs its configure hook into one [`ConfigureAccumulator`].
//! 2. Host fires ready.
//! 3. First call per service runs the initialize hook; afterwards calls are
//!    dispatched to the module directly.

mod catalog;
mod loader;
mod record;

pub use catalog::ModuleCatalog;
pub use loader::{ServiceHandle, ServiceLoader};
pub use record::{Dispatch, ServiceRecord, ServiceState};

use record::InitFuture;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::callback::CallbackContext;
use crate::host::{HeadlessApp, HostApp, HostWindow, ReadySignal};
use crate::plugin::adapter::panic_message;
use crate::plugin::{
    invoke, ConfigContext, ConfigureAccumulator, InitContext, Outcome, PluginContext,
    PluginModule, Target,
};
use crate::types::{AppConfig, Config, Error, Result};
use loader::DependencyGraph;

/// A declared service: exposed name → implementation module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub module_id: String,
    pub plugin_id: String,
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`ServiceRegistry`] from configuration and a module catalog.
#[derive(Debug)]
pub struct RegistryBuilder<'a> {
    config: &'a Config,
    catalog: ModuleCatalog,
    window: Option<Arc<dyn HostWindow>>,
    app: Option<Arc<dyn HostApp>>,
    ready: Option<ReadySignal>,
}

impl<'a> RegistryBuilder<'a> {
    /// Main window handed to plugins through their init context.
    pub fn window(mut self, window: Arc<dyn HostWindow>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn app(mut self, app: Arc<dyn HostApp>) -> Self {
        self.app = Some(app);
        self
    }

    /// Readiness gate for initialization. Defaults to already-ready.
    pub fn ready(mut self, ready: ReadySignal) -> Self {
        self.ready = Some(ready);
        self
    }

    /// Validate the configuration and build the registry.
    ///
    /// Fails if a service points at a module id missing from the catalog.
    pub fn build(self) -> Result<Arc<ServiceRegistry>> {
        self.config.validate()?;

        let mut descriptors = BTreeMap::new();
        for (name, entry) in &self.config.services {
            if !self.catalog.contains(&entry.module_id) {
                return Err(Error::config(format!(
                    "service '{}' refers to unknown module '{}'",
                    name, entry.module_id
                )));
            }
            descriptors.insert(
                name.clone(),
                ServiceDescriptor {
                    name: name.clone(),
                    module_id: entry.module_id.clone(),
                    plugin_id: entry.plugin_id.clone(),
                },
            );
        }

        let variables = descriptors
            .values()
            .map(|d| {
                (
                    d.plugin_id.clone(),
                    Arc::new(self.config.variables_for(&d.plugin_id)),
                )
            })
            .collect();

        tracing::info!(
            services = descriptors.len(),
            modules = self.catalog.len(),
            "service registry built"
        );

        Ok(Arc::new(ServiceRegistry {
            descriptors,
            variables,
            catalog: self.catalog,
            app_config: self.config.app.clone(),
            window: self.window,
            app: self
                .app
                .unwrap_or_else(|| Arc::new(HeadlessApp::new()) as Arc<dyn HostApp>),
            ready: self.ready.unwrap_or_else(ReadySignal::ready),
            records: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            dependencies: DependencyGraph::default(),
            configured: AtomicBool::new(false),
        }))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Owns every service record and drives the plugin lifecycle.
pub struct ServiceRegistry {
    descriptors: BTreeMap<String, ServiceDescriptor>,
    variables: HashMap<String, Arc<BTreeMap<String, String>>>,
    catalog: ModuleCatalog,
    app_config: AppConfig,
    window: Option<Arc<dyn HostWindow>>,
    app: Arc<dyn HostApp>,
    ready: ReadySignal,
    records: Mutex<HashMap<String, Arc<ServiceRecord>>>,
    /// Module id → shared initialization of that module.
    modules: Mutex<HashMap<String, InitFuture>>,
    dependencies: DependencyGraph,
    configured: AtomicBool,
}

impl ServiceRegistry {
    pub fn builder(config: &Config, catalog: ModuleCatalog) -> RegistryBuilder<'_> {
        RegistryBuilder {
            config,
            catalog,
            window: None,
            app: None,
            ready: None,
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.descriptors.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.values()
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    /// Run every distinct module's configure hook, then apply the declared
    /// default protocols through the host app.
    ///
    /// Must run once, before the host signals readiness.
    pub fn configure(&self) -> Result<ConfigureAccumulator> {
        if self.ready.is_ready() {
            return Err(Error::config(
                "configure phase must run before the host is ready",
            ));
        }
        if self.configured.swap(true, Ordering::AcqRel) {
            return Err(Error::config("configure phase already ran"));
        }

        let mut accumulator = ConfigureAccumulator::new();
        let mut seen = HashSet::new();
        for descriptor in self.descriptors.values() {
            if !seen.insert(descriptor.module_id.as_str()) {
                continue;
            }
            let Some(module) = self.catalog.get(&descriptor.module_id) else {
                continue;
            };

            let mut ctx = ConfigContext::new(self.plugin_context(descriptor), &mut accumulator);
            let settled = panic::catch_unwind(AssertUnwindSafe(|| module.configure(&mut ctx)));
            let message = match settled {
                Ok(Ok(())) => {
                    tracing::debug!(module = %descriptor.module_id, "module configured");
                    continue;
                }
                Ok(Err(reason)) => reason.message(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            let err = Error::initialization_failure(&descriptor.name, message);
            tracing::error!(module = %descriptor.module_id, "configure failed: {}", err);
            return Err(err);
        }

        for protocol in accumulator.default_protocols() {
            if !self.app.set_as_default_protocol_client(protocol) {
                tracing::warn!("could not become default protocol client for '{}'", protocol);
            }
        }

        Ok(accumulator)
    }

    /// The record for `name`, created on first reference.
    ///
    /// Undeclared names get a permanent "service unavailable" stub.
    pub fn get_or_create(&self, name: &str) -> Arc<ServiceRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(records.entry(name.to_string()).or_insert_with(|| {
            match self.descriptors.get(name) {
                Some(descriptor) => Arc::new(ServiceRecord::declared(descriptor.clone())),
                None => {
                    tracing::warn!("unknown service requested: {}", name);
                    Arc::new(ServiceRecord::undeclared(name))
                }
            }
        }))
    }

    /// Route one front-end call. Never fails: every outcome, including an
    /// unavailable service, ends as an envelope on `ctx`.
    pub async fn exec(
        self: &Arc<Self>,
        service: &str,
        action: &str,
        args: Vec<Value>,
        ctx: &CallbackContext,
    ) -> Outcome {
        let record = self.get_or_create(service);
        let dispatch = match record.settled() {
            Some(dispatch) => dispatch,
            None => record.initialization(self).await,
        };

        match dispatch {
            Dispatch::Ready(module) => {
                let module_id = record
                    .descriptor()
                    .map(|d| d.module_id.as_str())
                    .unwrap_or_default();
                let target = Target { service, module_id };
                invoke(&module, target, action, args, ctx).await
            }
            Dispatch::Unavailable(failure) => {
                ctx.fail(&Dispatch::replay_error(&failure));
                Outcome::Unhandled
            }
        }
    }

    /// Current lifecycle state of every declared or referenced service.
    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        let mut states: BTreeMap<String, ServiceState> = self
            .descriptors
            .keys()
            .map(|name| (name.clone(), ServiceState::Unresolved))
            .collect();
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, record) in records.iter() {
            states.insert(name.clone(), record.state());
        }
        states
    }

    /// Loader path: the initializer of module `requester` waits for `name`.
    pub(crate) async fn load_for(self: &Arc<Self>, requester: &str, name: &str) -> Result<ServiceHandle> {
        let record = self.get_or_create(name);
        let dispatch = match (record.settled(), record.descriptor()) {
            (Some(dispatch), _) => dispatch,
            (None, Some(descriptor)) => {
                let _wait = self.dependencies.enter(requester, &descriptor.module_id)?;
                record.initialization(self).await
            }
            (None, None) => record.initialization(self).await,
        };

        match dispatch {
            Dispatch::Ready(module) => {
                let module_id = record
                    .descriptor()
                    .map(|d| d.module_id.clone())
                    .unwrap_or_default();
                Ok(ServiceHandle::new(name, module_id, module))
            }
            Dispatch::Unavailable(failure) => Err(Dispatch::replay_error(&failure)),
        }
    }

    /// Body of the shared initialization future of `record`.
    pub(crate) async fn initialize(self: &Arc<Self>, record: &ServiceRecord) -> Dispatch {
        let Some(descriptor) = record.descriptor() else {
            return Dispatch::Unavailable(Arc::new(Error::service_unavailable(record.name())));
        };

        record.advance(ServiceState::Initializing);
        let dispatch = self.module_initialization(descriptor).await;
        match &dispatch {
            Dispatch::Ready(module) => {
                record.advance(ServiceState::Ready);
                tracing::info!(
                    service = %descriptor.name,
                    module = %descriptor.module_id,
                    generation = module.generation(),
                    "service initialized"
                );
            }
            Dispatch::Unavailable(_) => record.advance(ServiceState::Failed),
        }
        dispatch
    }

    /// The shared initialization of `descriptor`'s module. The first service
    /// to reach a module installs it; later services on that module join it.
    fn module_initialization(self: &Arc<Self>, descriptor: &ServiceDescriptor) -> InitFuture {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        modules
            .entry(descriptor.module_id.clone())
            .or_insert_with(|| {
                let registry = Arc::clone(self);
                let descriptor = descriptor.clone();
                async move {
                    match registry.run_initialize(&descriptor).await {
                        Ok(module) => Dispatch::Ready(module),
                        Err(err) => {
                            tracing::error!(module = %descriptor.module_id, "{}", err);
                            Dispatch::Unavailable(Arc::new(err))
                        }
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    async fn run_initialize(self: &Arc<Self>, descriptor: &ServiceDescriptor) -> Result<PluginModule> {
        self.ready
            .wait()
            .await
            .map_err(|e| Error::initialization_failure(&descriptor.name, e.to_string()))?;

        let module = self
            .catalog
            .get(&descriptor.module_id)
            .cloned()
            .ok_or_else(|| {
                Error::initialization_failure(
                    &descriptor.name,
                    format!("module '{}' is not loaded", descriptor.module_id),
                )
            })?;

        let ctx = InitContext::new(
            self.plugin_context(descriptor),
            ServiceLoader::new(
                Arc::downgrade(self),
                descriptor.name.clone(),
                descriptor.module_id.clone(),
            ),
            self.window.clone(),
            Arc::clone(&self.app),
        );

        let settled = AssertUnwindSafe(module.initialize(ctx)).catch_unwind().await;
        match settled {
            Ok(Ok(())) => Ok(module),
            Ok(Err(reason)) => Err(Error::initialization_failure(
                &descriptor.name,
                reason.message(),
            )),
            Err(panic) => Err(Error::initialization_failure(
                &descriptor.name,
                panic_message(panic.as_ref()),
            )),
        }
    }

    fn plugin_context(&self, descriptor: &ServiceDescriptor) -> PluginContext {
        let variables = self
            .variables
            .get(&descriptor.plugin_id)
            .cloned()
            .unwrap_or_default();
        PluginContext::new(
            variables,
            self.app_config.scheme.clone(),
            self.app_config.hostname.clone(),
        )
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.descriptors.keys().collect::<Vec<_>>())
            .field("ready", &self.ready.is_ready())
            .finish()
    }
}
