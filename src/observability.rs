//! Observability utilities.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log format (`json` or anything else).
pub const LOG_FORMAT_ENV: &str = "BRIDGE_LOG_FORMAT";

/// Initialize tracing subscriber once for the process.
///
/// Filter comes from `RUST_LOG`, falling back to `config.log_level`. Output is
/// compact text unless `config.json_logs` is set or `BRIDGE_LOG_FORMAT=json`.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let format = std::env::var(LOG_FORMAT_ENV).ok();
        let env_filter = env_filter(rust_log.as_deref(), config);

        let result = if json_output(format.as_deref(), config) {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

fn env_filter(rust_log: Option<&str>, config: &ObservabilityConfig) -> EnvFilter {
    rust_log
        .map(EnvFilter::try_new)
        .unwrap_or_else(|| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn json_output(format: Option<&str>, config: &ObservabilityConfig) -> bool {
    format.map_or(config.json_logs, |v| v.eq_ignore_ascii_case("json"))
}
