//! Per-service record: lifecycle state and the memoized initialization.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::{ServiceDescriptor, ServiceRegistry};
use crate::plugin::PluginModule;
use crate::types::Error;

/// Lifecycle of a service record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Unresolved,
    Initializing,
    Ready,
    Failed,
}

/// What a call to the service is routed to once initialization settled.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Ready(PluginModule),
    /// Sticky stub: every call reproduces the original failure.
    Unavailable(Arc<Error>),
}

impl Dispatch {
    /// A fresh error equal in category and message to the stored failure.
    pub fn replay_error(failure: &Error) -> Error {
        match failure {
            Error::ServiceUnavailable(service) => Error::service_unavailable(service),
            Error::InitializationFailure { service, message } => {
                Error::initialization_failure(service, message)
            }
            other => Error::initialization_failure(
                other.service().unwrap_or_default(),
                other.to_string(),
            ),
        }
    }
}

pub(crate) type InitFuture = Shared<BoxFuture<'static, Dispatch>>;

/// One record per referenced service name.
pub struct ServiceRecord {
    name: String,
    descriptor: Option<ServiceDescriptor>,
    state: Mutex<ServiceState>,
    /// Unset → pending (shared future installed) → resolved, exactly once.
    init: OnceLock<InitFuture>,
}

impl ServiceRecord {
    pub(crate) fn declared(descriptor: ServiceDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            descriptor: Some(descriptor),
            state: Mutex::new(ServiceState::Unresolved),
            init: OnceLock::new(),
        }
    }

    /// A name with no descriptor: permanently the "service unavailable" stub.
    pub(crate) fn undeclared(name: &str) -> Self {
        let failure = Arc::new(Error::service_unavailable(name));
        let stub = futures::future::ready(Dispatch::Unavailable(failure))
            .boxed()
            .shared();
        // `peek` only reports a result once some clone has been polled.
        let _ = stub.clone().now_or_never();
        let init = OnceLock::new();
        let _ = init.set(stub);
        Self {
            name: name.to_string(),
            descriptor: None,
            state: Mutex::new(ServiceState::Failed),
            init,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move forward to `next`; backward moves are ignored.
    pub(crate) fn advance(&self, next: ServiceState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if next > *state {
            *state = next;
        }
    }

    /// The shared initialization future. The first caller installs it; every
    /// caller, concurrent or later, awaits the same one.
    pub(crate) fn initialization(self: &Arc<Self>, registry: &Arc<ServiceRegistry>) -> InitFuture {
        self.init
            .get_or_init(|| {
                let record = Arc::clone(self);
                let registry = Arc::clone(registry);
                async move { registry.initialize(&record).await }
                    .boxed()
                    .shared()
            })
            .clone()
    }

    /// The settled dispatch, if initialization already finished.
    pub(crate) fn settled(&self) -> Option<Dispatch> {
        self.init.get().and_then(|init| init.peek().cloned())
    }
}

impl fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRecord")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish()
    }
}
