//! Native bridge host - standalone entry point.
//!
//! Serves front-end windows over TCP:
//! - loads the JSON configuration (service map, plugin variables, scheme)
//! - runs the configure phase of every plugin, then signals readiness
//! - accepts exec frames until Ctrl-C
//!
//! A TCP host has no browser session, so the sandboxed resource protocol is
//! only exposed through `resolve`.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;

use native_bridge::host::ReadySignal;
use native_bridge::ipc::IpcServer;
use native_bridge::protocol::ProtocolGuard;
use native_bridge::{
    Bridge, CallbackContext, Config, ExecVerdict, LegacyMapPlugin, ModuleCatalog, Payload,
    PluginError, ServicePlugin, ServiceRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "native-bridge")]
#[command(about = "Plugin service bridge for sandboxed front-ends", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve front-end connections (default)
    Serve {
        /// Listen address, overrides `ipc.listen_addr`
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Resolve an application URL against the sandbox and print the path
    Resolve { url: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if cli.log_json {
        config.observability.json_logs = true;
    }
    native_bridge::observability::init_tracing(&config.observability);
    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve { listen: None }) {
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.ipc.listen_addr = listen;
            }
            serve(config).await
        }
        Commands::Resolve { url } => {
            let guard = ProtocolGuard::new(&config.app, &Default::default())?;
            println!("{}", guard.handle(&url)?.display());
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (trigger, ready) = ReadySignal::new();
    let registry = ServiceRegistry::builder(&config, builtin_modules())
        .ready(ready)
        .build()?;

    // Pre-ready: plugin declarations.
    let accumulator = registry.configure()?;
    tracing::debug!(
        schemes = accumulator.schemes().count(),
        "configure phase complete"
    );
    trigger.fire();

    let addr: SocketAddr = config.ipc.listen_addr.parse()?;
    let server = IpcServer::new(Bridge::new(registry), addr, config.ipc.clone());
    tracing::info!("native bridge starting on {}", addr);

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

/// Modules linked into the standalone host.
fn builtin_modules() -> ModuleCatalog {
    ModuleCatalog::new()
        .with_router("native-bridge.echo", EchoPlugin)
        .with_legacy("native-bridge.device", device_plugin())
}

/// Upper bound on the `countdown` start value.
const MAX_COUNTDOWN: u64 = 100;

/// `echo` answers with its arguments; `countdown` streams `n..1` as progress.
#[derive(Debug)]
struct EchoPlugin;

#[async_trait]
impl ServicePlugin for EchoPlugin {
    async fn exec(
        &self,
        action: &str,
        args: Vec<Value>,
        ctx: CallbackContext,
    ) -> Result<ExecVerdict, PluginError> {
        match action {
            "echo" => {
                ctx.success(Value::Array(args));
                Ok(ExecVerdict::Handled)
            }
            "countdown" => {
                let from = countdown_start(&args);
                for n in (1..=from).rev() {
                    ctx.progress(n);
                }
                ctx.success("liftoff");
                Ok(ExecVerdict::Handled)
            }
            _ => Ok(ExecVerdict::Unhandled),
        }
    }
}

fn countdown_start(args: &[Value]) -> u64 {
    args.first()
        .and_then(Value::as_u64)
        .unwrap_or(3)
        .min(MAX_COUNTDOWN)
}

fn device_plugin() -> LegacyMapPlugin {
    LegacyMapPlugin::new().action("getInfo", |_args| async {
        Ok::<_, PluginError>(Payload::from(json!({
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "version": env!("CARGO_PKG_VERSION"),
        })))
    })
}
