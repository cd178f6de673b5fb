//! Module catalog - implementation modules the host links in, by module id.

use std::collections::HashMap;

use crate::plugin::{LegacyMapPlugin, PluginModule, ServicePlugin};

/// Module id → loaded plugin module.
///
/// The host fills the catalog once at startup; the service map in the
/// configuration then points declared services at these ids.
#[derive(Debug, Default, Clone)]
pub struct ModuleCatalog {
    modules: HashMap<String, PluginModule>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A later registration under the same id replaces it.
    pub fn register(&mut self, module_id: impl Into<String>, module: PluginModule) {
        let module_id = module_id.into();
        if self.modules.insert(module_id.clone(), module).is_some() {
            tracing::warn!("module '{}' registered twice, keeping the last", module_id);
        }
    }

    /// Builder form of [`Self::register`].
    pub fn with(mut self, module_id: impl Into<String>, module: PluginModule) -> Self {
        self.register(module_id, module);
        self
    }

    pub fn with_router(self, module_id: impl Into<String>, plugin: impl ServicePlugin + 'static) -> Self {
        self.with(module_id, PluginModule::router(plugin))
    }

    pub fn with_legacy(self, module_id: impl Into<String>, plugin: LegacyMapPlugin) -> Self {
        self.with(module_id, PluginModule::legacy(plugin))
    }

    pub fn get(&self, module_id: &str) -> Option<&PluginModule> {
        self.modules.get(module_id)
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
