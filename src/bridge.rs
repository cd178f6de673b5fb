//! Inbound call entry point.
//!
//! One [`ExecRequest`] per front-end call. The bridge never reports a failure
//! back to the transport: whatever happens, including a panic while routing,
//! ends as an envelope pushed under the request's callback id.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::callback::CallbackContext;
use crate::host::HostWindow;
use crate::plugin::adapter::panic_message;
use crate::plugin::Outcome;
use crate::registry::ServiceRegistry;
use crate::types::{CallbackId, Error};

/// A front-end call: `service.action(args)`, answered under `callback_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    #[serde(alias = "serviceName")]
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub callback_id: CallbackId,
}

#[derive(Debug, Clone)]
pub struct Bridge {
    registry: Arc<ServiceRegistry>,
}

impl Bridge {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Route one call; results are pushed to `window`.
    pub async fn handle(&self, request: ExecRequest, window: Arc<dyn HostWindow>) -> Outcome {
        let ExecRequest {
            service,
            action,
            args,
            callback_id,
        } = request;
        tracing::debug!(
            %callback_id,
            window = window.label(),
            "exec {}.{} ({} args)",
            service,
            action,
            args.len()
        );

        let ctx = CallbackContext::new(callback_id, window);
        let settled = AssertUnwindSafe(self.registry.exec(&service, &action, args, &ctx))
            .catch_unwind()
            .await;

        match settled {
            Ok(outcome) => outcome,
            Err(panic) => {
                let err =
                    Error::invocation_exception(&service, &action, panic_message(panic.as_ref()));
                tracing::error!("{}", err);
                ctx.fail(&err);
                Outcome::Terminated
            }
        }
    }

    /// [`Self::handle`] on its own task.
    pub fn spawn(&self, request: ExecRequest, window: Arc<dyn HostWindow>) -> JoinHandle<Outcome> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.handle(request, window).await })
    }
}
