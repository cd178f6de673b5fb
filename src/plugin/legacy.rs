//! Legacy plugin shape: a map of action name → async function.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{InitContext, PluginError};
use crate::envelope::Payload;
use crate::registry::ServiceLoader;

type ActionFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Payload, PluginError>> + Send + Sync>;
type InitFn = Arc<
    dyn Fn(BTreeMap<String, String>, ServiceLoader) -> BoxFuture<'static, Result<(), PluginError>>
        + Send
        + Sync,
>;

/// Deprecated map-of-functions plugin. Actions cannot report progress.
#[derive(Default)]
pub struct LegacyMapPlugin {
    actions: HashMap<String, ActionFn>,
    init: Option<InitFn>,
    warned: AtomicBool,
}

impl LegacyMapPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action. Resolving to `Ok(v)` yields `success(v)`, `Err(e)` yields `error(e)`.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, PluginError>> + Send + 'static,
    {
        self.actions
            .insert(name.into(), Arc::new(move |args| f(args).boxed()));
        self
    }

    /// Set the `init(variables, loader)` hook, run once during the initialize phase.
    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(BTreeMap<String, String>, ServiceLoader) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |vars, loader| f(vars, loader).boxed()));
        self
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    /// True exactly once per plugin: the first caller logs the deprecation.
    pub(crate) fn take_deprecation_warning(&self) -> bool {
        !self.warned.swap(true, Ordering::AcqRel)
    }

    pub(crate) async fn init(&self, ctx: InitContext) -> Result<(), PluginError> {
        match &self.init {
            Some(init) => init(ctx.variables().clone(), ctx.loader().clone()).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LegacyMapPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("LegacyMapPlugin")
            .field("actions", &actions)
            .field("init", &self.init.is_some())
            .finish()
    }
}
