//! Lifecycle integration tests - configure → ready → initialize → exec,
//! driven only through the public API.

use async_trait::async_trait;
use native_bridge::host::{ChannelWindow, HeadlessApp, HeadlessProtocolHost, Push, ReadySignal};
use native_bridge::plugin::{ConfigContext, CustomScheme, InitContext};
use native_bridge::protocol::{register_privileged_schemes, ProtocolGuard};
use native_bridge::registry::ServiceState;
use native_bridge::types::{CallbackId, ServiceEntry};
use native_bridge::{
    Bridge, CallbackContext, Config, Error, ExecRequest, ExecVerdict, LegacyMapPlugin,
    ModuleCatalog, Payload, PluginError, ServicePlugin, ServiceRegistry, Status,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Storage-like plugin: declares a scheme and a partition, reads its API key
/// at initialization, and talks to the legacy `Clock` service.
struct Vault {
    inits: Arc<AtomicUsize>,
    api_key: Mutex<Option<String>>,
    clock: Mutex<Option<Value>>,
}

#[async_trait]
impl ServicePlugin for Vault {
    fn configure(&self, ctx: &mut ConfigContext<'_>) -> Result<(), PluginError> {
        ctx.register_scheme_as_privileged(CustomScheme::standard_secure("vault"));
        ctx.register_default_protocol("vault-app");
        ctx.require_partition("persist:vault");
        Ok(())
    }

    async fn initialize(&self, ctx: InitContext) -> Result<(), PluginError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        *self.api_key.lock().unwrap() = ctx.variable("API_KEY").map(str::to_string);

        let clock = ctx.get_service("Clock").await?;
        let now = clock.call("now", vec![]).await;
        if now.status.is_error() {
            return Err(PluginError::new(Payload::from(now.data)));
        }
        *self.clock.lock().unwrap() = Some(now.data);
        Ok(())
    }

    async fn exec(
        &self,
        action: &str,
        _args: Vec<Value>,
        ctx: CallbackContext,
    ) -> Result<ExecVerdict, PluginError> {
        match action {
            "describe" => {
                ctx.progress("unlocking");
                ctx.success(json!({
                    "apiKey": *self.api_key.lock().unwrap(),
                    "clock": *self.clock.lock().unwrap(),
                }));
                Ok(ExecVerdict::Handled)
            }
            _ => Ok(ExecVerdict::Unhandled),
        }
    }
}

fn config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.app.app_root = root.to_path_buf();
    for (name, module) in [("Vault", "vault"), ("Clock", "clock")] {
        config.services.insert(
            name.to_string(),
            ServiceEntry {
                module_id: module.to_string(),
                plugin_id: format!("{module}-plugin"),
            },
        );
    }
    config.plugins.insert(
        "vault-plugin".to_string(),
        BTreeMap::from([("API_KEY".to_string(), "s3cret".to_string())]),
    );
    config
}

fn catalog(inits: &Arc<AtomicUsize>) -> ModuleCatalog {
    ModuleCatalog::new()
        .with_router(
            "vault",
            Vault {
                inits: Arc::clone(inits),
                api_key: Mutex::new(None),
                clock: Mutex::new(None),
            },
        )
        .with_legacy(
            "clock",
            LegacyMapPlugin::new().action("now", |_| async {
                Ok::<_, PluginError>(Payload::from(json!({"tick": 42})))
            }),
        )
}

fn request(service: &str, action: &str, id: &str) -> ExecRequest {
    ExecRequest {
        service: service.to_string(),
        action: action.to_string(),
        args: vec![],
        callback_id: CallbackId::from_string(id.to_string()).unwrap(),
    }
}

async fn collect_until_terminal(rx: &mut UnboundedReceiver<Push>) -> Vec<Push> {
    let mut pushes = Vec::new();
    loop {
        let push = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no envelope within 5s")
            .expect("window closed");
        let terminal = push.result.is_terminal();
        pushes.push(push);
        if terminal {
            return pushes;
        }
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let inits = Arc::new(AtomicUsize::new(0));
    let app = Arc::new(HeadlessApp::new());
    let (trigger, ready) = ReadySignal::new();

    let registry = ServiceRegistry::builder(&config, catalog(&inits))
        .app(app.clone())
        .ready(ready)
        .build()
        .unwrap();

    // Pre-ready.
    let accumulator = registry.configure().unwrap();
    let protocols = HeadlessProtocolHost::new();
    register_privileged_schemes(&protocols, &config.app, &accumulator).unwrap();
    let privileged: Vec<String> = protocols
        .privileged_schemes()
        .into_iter()
        .map(|s| s.scheme)
        .collect();
    assert_eq!(privileged, vec!["app".to_string(), "vault".to_string()]);
    assert_eq!(app.default_protocols(), vec!["vault-app".to_string()]);

    // A call issued before readiness waits for it.
    let bridge = Bridge::new(Arc::clone(&registry));
    let (window, mut rx) = ChannelWindow::new("main");
    let window = Arc::new(window);
    let early = bridge.spawn(request("Vault", "describe", "Vault1"), window.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(inits.load(Ordering::SeqCst), 0);

    trigger.fire();
    let installed = ProtocolGuard::new(&config.app, &accumulator)
        .unwrap()
        .install(&protocols)
        .unwrap();
    assert_eq!(installed, 4);

    early.await.unwrap();
    let pushes = collect_until_terminal(&mut rx).await;
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].result.data, json!("unlocking"));
    assert!(pushes[0].result.keep_callback);
    assert_eq!(
        pushes[1].result.data,
        json!({"apiKey": "s3cret", "clock": {"tick": 42}})
    );

    // Later calls reuse the initialized service.
    bridge
        .handle(request("Vault", "describe", "Vault2"), window.clone())
        .await;
    let pushes = collect_until_terminal(&mut rx).await;
    assert_eq!(pushes.last().unwrap().callback_id.as_str(), "Vault2");
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    let states = registry.states();
    assert_eq!(states["Vault"], ServiceState::Ready);
    assert_eq!(states["Clock"], ServiceState::Ready);

    // Resources resolve on the partition the plugin asked for, never outside.
    let page = protocols
        .resolve(Some("persist:vault"), "app://localhost/index.html")
        .unwrap();
    assert!(page.starts_with(dir.path()));
    assert!(matches!(
        protocols.resolve(None, "app://localhost/../../etc/passwd"),
        Err(Error::SandboxViolation(_))
    ));
}

#[tokio::test]
async fn test_failed_dependency_is_sticky_for_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let inits = Arc::new(AtomicUsize::new(0));
    let catalog = catalog(&inits).with_legacy(
        "clock",
        LegacyMapPlugin::new().on_init(|_, _| async {
            Err::<(), _>(PluginError::from("clock hardware missing"))
        }),
    );
    let registry = ServiceRegistry::builder(&config, catalog).build().unwrap();
    let bridge = Bridge::new(registry);

    for id in ["Vault1", "Vault2"] {
        let (window, mut rx) = ChannelWindow::new("main");
        bridge
            .handle(request("Vault", "describe", id), Arc::new(window))
            .await;
        let pushes = collect_until_terminal(&mut rx).await;
        assert_eq!(pushes.len(), 1);
        let result = &pushes[0].result;
        assert_eq!(result.status, Status::ERROR);
        assert_eq!(result.data["code"], "INITIALIZATION_FAILURE");
        assert!(result.data["message"]
            .as_str()
            .unwrap()
            .contains("clock hardware missing"));
    }
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    let states = bridge.registry().states();
    assert_eq!(states["Clock"], ServiceState::Failed);
    assert_eq!(states["Vault"], ServiceState::Failed);
}
