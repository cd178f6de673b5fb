//! Cross-service lookup for plugins, with cycle detection.
//!
//! Every pending `get_service` call made from inside an initializer is an
//! edge "requesting module waits for target module" in a wait-for graph
//! (initialization is shared per module, so nodes are module ids). Adding
//! an edge that closes a cycle would deadlock both initializers, so it is
//! refused with [`Error::CircularDependency`] instead.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::ServiceRegistry;
use crate::callback::CallbackContext;
use crate::envelope::PluginResult;
use crate::host::ChannelWindow;
use crate::plugin::{invoke, Outcome, PluginModule, Target};
use crate::types::{CallbackId, Error, Result};

// =============================================================================
// Loader
// =============================================================================

/// Handle a plugin uses to reach other services during its initialization.
#[derive(Clone)]
pub struct ServiceLoader {
    registry: Weak<ServiceRegistry>,
    requester: String,
    module_id: String,
}

impl ServiceLoader {
    pub(crate) fn new(
        registry: Weak<ServiceRegistry>,
        requester: impl Into<String>,
        module_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            requester: requester.into(),
            module_id: module_id.into(),
        }
    }

    /// Name of the service this loader was issued to.
    pub fn requester(&self) -> &str {
        &self.requester
    }

    /// Module whose initializer holds this loader.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Look up `name`, waiting for its initialization to settle.
    pub async fn get_service(&self, name: &str) -> Result<ServiceHandle> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| Error::channel_closed("service registry is gone"))?;
        registry.load_for(&self.module_id, name).await
    }
}

impl fmt::Debug for ServiceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLoader")
            .field("requester", &self.requester)
            .field("module_id", &self.module_id)
            .finish()
    }
}

// =============================================================================
// Handle
// =============================================================================

/// An initialized service, as seen by another plugin.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    name: String,
    module_id: String,
    module: PluginModule,
}

impl ServiceHandle {
    pub(crate) fn new(name: impl Into<String>, module_id: impl Into<String>, module: PluginModule) -> Self {
        Self {
            name: name.into(),
            module_id: module_id.into(),
            module,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn module(&self) -> &PluginModule {
        &self.module
    }

    /// Invoke an action, delivering envelopes through `ctx`.
    pub async fn exec(&self, action: &str, args: Vec<Value>, ctx: &CallbackContext) -> Outcome {
        let target = Target {
            service: &self.name,
            module_id: &self.module_id,
        };
        invoke(&self.module, target, action, args, ctx).await
    }

    /// Invoke an action and wait for its terminal envelope. Progress
    /// envelopes are discarded.
    pub async fn call(&self, action: &str, args: Vec<Value>) -> PluginResult {
        let (window, mut rx) = ChannelWindow::new(format!("service:{}", self.name));
        let ctx = CallbackContext::new(CallbackId::new(), Arc::new(window));
        self.exec(action, args, &ctx).await;
        drop(ctx);

        while let Some(push) = rx.recv().await {
            if push.result.is_terminal() {
                return push.result;
            }
        }
        PluginResult::from_error(&Error::invocation_exception(
            &self.name,
            action,
            "callback context dropped without a result",
        ))
    }
}

// =============================================================================
// Wait-for graph
// =============================================================================

/// Pending cross-service waits, counted per edge.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    waits: Mutex<HashMap<String, HashMap<String, usize>>>,
}

impl DependencyGraph {
    /// Record that `from` waits for `to`, unless that closes a cycle.
    pub(crate) fn enter(&self, from: &str, to: &str) -> Result<WaitGuard<'_>> {
        let mut waits = self.waits.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(path) = find_path(&waits, to, from) {
            let mut chain = Vec::with_capacity(path.len() + 1);
            chain.push(from.to_string());
            chain.extend(path);
            return Err(Error::CircularDependency(chain));
        }
        *waits
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_insert(0) += 1;
        Ok(WaitGuard {
            graph: self,
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    fn leave(&self, from: &str, to: &str) {
        let mut waits = self.waits.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(targets) = waits.get_mut(from) else {
            return;
        };
        if let Some(count) = targets.get_mut(to) {
            *count -= 1;
            if *count == 0 {
                targets.remove(to);
            }
        }
        if targets.is_empty() {
            waits.remove(from);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// Removes its edge when the wait ends, including on cancellation.
pub(crate) struct WaitGuard<'a> {
    graph: &'a DependencyGraph,
    from: String,
    to: String,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.graph.leave(&self.from, &self.to);
    }
}

/// Depth-first path `start → … → goal`, both ends included.
fn find_path(
    waits: &HashMap<String, HashMap<String, usize>>,
    start: &str,
    goal: &str,
) -> Option<Vec<String>> {
    fn visit(
        waits: &HashMap<String, HashMap<String, usize>>,
        node: &str,
        goal: &str,
        seen: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> bool {
        path.push(node.to_string());
        if node == goal {
            return true;
        }
        if seen.insert(node.to_string()) {
            if let Some(next) = waits.get(node) {
                let mut next: Vec<&String> = next.keys().collect();
                next.sort();
                for target in next {
                    if visit(waits, target, goal, seen, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }

    let mut path = Vec::new();
    visit(waits, start, goal, &mut HashSet::new(), &mut path).then_some(path)
}
