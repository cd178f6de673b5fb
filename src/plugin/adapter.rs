//! Uniform invocation over both plugin generations.
//!
//! Business results only ever travel through the callback context. The
//! returned [`Outcome`] says whether the action was found, nothing more.
//! Plugin failures, including panics, end as an error envelope and never
//! reach the caller.

use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::{ExecVerdict, LegacyMapPlugin, PluginModule, ServicePlugin};
use crate::callback::CallbackContext;
use crate::types::Error;

/// Names used to report on an invocation.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub service: &'a str,
    pub module_id: &'a str,
}

/// Result of the dispatch mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The action ran; a terminal envelope was sent or is the plugin's to send.
    Terminated,
    /// The plugin has no such action; an error envelope was sent.
    Unhandled,
}

/// Invoke `action` on `module`.
pub async fn invoke(
    module: &PluginModule,
    target: Target<'_>,
    action: &str,
    args: Vec<Value>,
    ctx: &CallbackContext,
) -> Outcome {
    match module {
        PluginModule::Legacy(plugin) => invoke_legacy(plugin, target, action, args, ctx).await,
        PluginModule::Router(plugin) => {
            invoke_router(plugin.as_ref(), target, action, args, ctx).await
        }
    }
}

async fn invoke_legacy(
    plugin: &LegacyMapPlugin,
    target: Target<'_>,
    action: &str,
    args: Vec<Value>,
    ctx: &CallbackContext,
) -> Outcome {
    if plugin.take_deprecation_warning() {
        tracing::warn!(
            "plugin {} is using a deprecated API lacking support for progress callbacks; \
             migrate to the current plugin API, support for this API may be removed",
            target.module_id
        );
    }

    let Some(function) = plugin.get(action) else {
        ctx.fail(&Error::action_not_found(target.service, action));
        return Outcome::Unhandled;
    };

    let settled = match panic::catch_unwind(AssertUnwindSafe(|| function(args))) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    match settled {
        Ok(Ok(value)) => ctx.success(value),
        Ok(Err(reason)) => ctx.error(reason.into_reason()),
        Err(panic) => report_exception(target, action, &panic_message(panic.as_ref()), ctx),
    }
    Outcome::Terminated
}

async fn invoke_router(
    plugin: &dyn ServicePlugin,
    target: Target<'_>,
    action: &str,
    args: Vec<Value>,
    ctx: &CallbackContext,
) -> Outcome {
    let settled = match panic::catch_unwind(AssertUnwindSafe(|| {
        plugin.exec(action, args, ctx.clone())
    })) {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    };

    match settled {
        Ok(Ok(ExecVerdict::Handled)) => Outcome::Terminated,
        Ok(Ok(ExecVerdict::Unhandled)) => {
            ctx.fail(&Error::action_not_found(target.service, action));
            Outcome::Unhandled
        }
        Ok(Ok(ExecVerdict::Unexpected(result))) => {
            let err = Error::unexpected_result(target.service, action, result);
            tracing::error!("{}", err);
            ctx.fail(&err);
            Outcome::Terminated
        }
        Ok(Err(reason)) => {
            report_exception(target, action, &reason.message(), ctx);
            Outcome::Terminated
        }
        Err(panic) => {
            report_exception(target, action, &panic_message(panic.as_ref()), ctx);
            Outcome::Terminated
        }
    }
}

fn report_exception(target: Target<'_>, action: &str, message: &str, ctx: &CallbackContext) {
    let err = Error::invocation_exception(target.service, action, message);
    tracing::error!(module = target.module_id, "{}", err);
    ctx.fail(&err);
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Payload, Status};
    use crate::host::{ChannelWindow, Push};
    use crate::plugin::PluginError;
    use crate::types::CallbackId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const TARGET: Target<'static> = Target {
        service: "Sample",
        module_id: "sample-plugin",
    };

    fn context() -> (CallbackContext, UnboundedReceiver<Push>) {
        let (window, rx) = ChannelWindow::new("test");
        let ctx = CallbackContext::new(CallbackId::new(), Arc::new(window));
        (ctx, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Push>) -> Vec<(Status, Value, bool)> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|p| (p.result.status, p.result.data, p.result.keep_callback))
            .collect()
    }

    struct Counter;

    #[async_trait]
    impl ServicePlugin for Counter {
        async fn exec(
            &self,
            action: &str,
            args: Vec<Value>,
            ctx: CallbackContext,
        ) -> Result<ExecVerdict, PluginError> {
            match action {
                "count" => {
                    ctx.progress(1);
                    ctx.progress(2);
                    ctx.success(3);
                    Ok(ExecVerdict::Handled)
                }
                "touch_then_deny" => {
                    ctx.progress("partial");
                    Ok(ExecVerdict::Unhandled)
                }
                "odd" => Ok(ExecVerdict::Unexpected(json!("maybe"))),
                "fail" => Err(PluginError::from("device busy")),
                "explode" => panic!("kaboom"),
                "echo" => {
                    ctx.success(Payload::from(Value::Array(args)));
                    Ok(true.into())
                }
                _ => Ok(false.into()),
            }
        }
    }

    fn legacy() -> PluginModule {
        PluginModule::legacy(
            LegacyMapPlugin::new()
                .action("resolve", |_| async {
                    Ok::<_, PluginError>(Payload::from(json!({"v": 1})))
                })
                .action("reject", |_| async {
                    Err::<Payload, _>(PluginError::new(Payload::from(json!({"e": "nope"}))))
                })
                .action("explode", explode),
        )
    }

    async fn explode(_args: Vec<Value>) -> Result<Payload, PluginError> {
        panic!("legacy kaboom")
    }

    #[tokio::test]
    async fn test_router_progress_then_success() {
        let (ctx, mut rx) = context();
        let module = PluginModule::router(Counter);
        let outcome = invoke(&module, TARGET, "count", vec![], &ctx).await;

        assert_eq!(outcome, Outcome::Terminated);
        assert_eq!(
            drain(&mut rx),
            vec![
                (Status::OK, json!(1), true),
                (Status::OK, json!(2), true),
                (Status::OK, json!(3), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_router_unhandled_is_action_not_found() {
        let (ctx, mut rx) = context();
        let module = PluginModule::router(Counter);
        let outcome = invoke(&module, TARGET, "touch_then_deny", vec![], &ctx).await;
        assert_eq!(outcome, Outcome::Unhandled);

        let seen = drain(&mut rx);
        let errors: Vec<_> = seen.iter().filter(|(s, _, _)| s.is_error()).collect();
        assert_eq!(errors.len(), 1);
        let (status, data, keep) = errors[0];
        assert!(status.has(Status::ERROR_UNKNOWN_ACTION));
        assert_eq!(data["code"], "ACTION_NOT_FOUND");
        assert!(!keep);
    }

    #[tokio::test]
    async fn test_router_unknown_action() {
        let (ctx, mut rx) = context();
        let module = PluginModule::router(Counter);
        invoke(&module, TARGET, "nope", vec![], &ctx).await;
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["code"], "ACTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_router_unexpected_result() {
        let (ctx, mut rx) = context();
        let module = PluginModule::router(Counter);
        invoke(&module, TARGET, "odd", vec![], &ctx).await;
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.has(Status::ERROR_UNEXPECTED_RESULT));
        assert_eq!(seen[0].1["result"], "maybe");
    }

    #[tokio::test]
    async fn test_router_error_and_panic_become_invocation_exception() {
        let module = PluginModule::router(Counter);
        for action in ["fail", "explode"] {
            let (ctx, mut rx) = context();
            let outcome = invoke(&module, TARGET, action, vec![], &ctx).await;
            assert_eq!(outcome, Outcome::Terminated);
            let seen = drain(&mut rx);
            assert_eq!(seen.len(), 1, "action {action}");
            assert!(seen[0].0.has(Status::ERROR_INVOCATION_EXCEPTION));
            assert_eq!(seen[0].1["code"], "INVOCATION_EXCEPTION");
        }
    }

    #[tokio::test]
    async fn test_router_receives_args() {
        let (ctx, mut rx) = context();
        let module = PluginModule::router(Counter);
        invoke(&module, TARGET, "echo", vec![json!("a"), json!(2)], &ctx).await;
        assert_eq!(drain(&mut rx), vec![(Status::OK, json!(["a", 2]), false)]);
    }

    #[tokio::test]
    async fn test_legacy_resolve_and_reject() {
        let module = legacy();

        let (ctx, mut rx) = context();
        invoke(&module, TARGET, "resolve", vec![], &ctx).await;
        assert_eq!(drain(&mut rx), vec![(Status::OK, json!({"v": 1}), false)]);

        let (ctx, mut rx) = context();
        invoke(&module, TARGET, "reject", vec![], &ctx).await;
        assert_eq!(drain(&mut rx), vec![(Status::ERROR, json!({"e": "nope"}), false)]);
    }

    #[tokio::test]
    async fn test_legacy_missing_action() {
        let (ctx, mut rx) = context();
        let outcome = invoke(&legacy(), TARGET, "absent", vec![], &ctx).await;
        assert_eq!(outcome, Outcome::Unhandled);
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.has(Status::ERROR_UNKNOWN_ACTION));
    }

    #[tokio::test]
    async fn test_legacy_panic_is_contained() {
        let (ctx, mut rx) = context();
        invoke(&legacy(), TARGET, "explode", vec![], &ctx).await;
        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1["message"]
            .as_str()
            .unwrap()
            .contains("legacy kaboom"));
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "panic");
    }
}
