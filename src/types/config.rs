//! Configuration structures.
//!
//! Configuration is loaded from a JSON file produced at build time and from
//! environment variables (log format, log filter). The bridge only reads the
//! fields below; everything else in the file is ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Error, Result};

/// The scheme that makes the bridge serve from the local filesystem directly.
pub const FILE_SCHEME: &str = "file";

/// Scheme names a host application may not claim for itself.
pub const DEFAULT_RESERVED_SCHEMES: &[&str] = &[
    "about",
    "blob",
    "chrome",
    "chrome-extension",
    "data",
    "devtools",
    "filesystem",
    "ftp",
    "http",
    "https",
    "javascript",
    "mailto",
    "ws",
    "wss",
];

/// Global bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Application scheme, hostname and sandbox root.
    #[serde(default)]
    pub app: AppConfig,

    /// Declared services: service name → implementation module and variable bucket.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,

    /// Plugin variables: plugin id → variable name → value.
    #[serde(default)]
    pub plugins: BTreeMap<String, BTreeMap<String, String>>,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Check the configuration for fatal mistakes before anything is registered.
    pub fn validate(&self) -> Result<()> {
        self.app.validate()?;

        for (name, entry) in &self.services {
            if name.is_empty() {
                return Err(Error::config("service name cannot be empty"));
            }
            if entry.module_id.is_empty() {
                return Err(Error::config(format!(
                    "service '{}' does not name an implementation module",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Variables for a plugin id (empty when the plugin declares none).
    pub fn variables_for(&self, plugin_id: &str) -> BTreeMap<String, String> {
        self.plugins.get(plugin_id).cloned().unwrap_or_default()
    }
}

/// Application-level settings consumed by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scheme used to serve embedded resources (`file` serves from disk).
    pub scheme: String,

    /// Hostname used to build URLs with the scheme above.
    pub hostname: String,

    /// Sandbox root: resources never resolve outside this directory.
    pub app_root: PathBuf,

    /// Schemes that cannot be claimed by the application.
    pub reserved_schemes: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheme: "app".to_string(),
            hostname: "localhost".to_string(),
            app_root: PathBuf::from("."),
            reserved_schemes: DEFAULT_RESERVED_SCHEMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AppConfig {
    pub fn is_file_protocol(&self) -> bool {
        self.scheme == FILE_SCHEME
    }

    /// Base URL every application resource starts with.
    ///
    /// `file://<app root>` for the file scheme, `scheme://hostname` otherwise.
    pub fn base_url(&self) -> String {
        if self.is_file_protocol() {
            format!("{}://{}", FILE_SCHEME, self.app_root.display())
        } else {
            format!("{}://{}", self.scheme, self.hostname)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheme.is_empty() {
            return Err(Error::config("scheme cannot be empty"));
        }
        if self
            .reserved_schemes
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&self.scheme))
        {
            return Err(Error::config(format!(
                "the scheme \"{}\" can not be registered, use a non-reserved scheme",
                self.scheme
            )));
        }
        if !self.is_file_protocol() && self.hostname.is_empty() {
            return Err(Error::config(format!(
                "scheme \"{}\" requires a hostname",
                self.scheme
            )));
        }
        Ok(())
    }
}

/// One entry of the service map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    /// Implementation module registered in the module catalog.
    #[serde(alias = "module_id")]
    pub module_id: String,

    /// Variable bucket in [`Config::plugins`].
    #[serde(default, alias = "plugin_id")]
    pub plugin_id: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Listen address for front-end connections (TCP).
    pub listen_addr: String,

    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent front-end connections.
    pub max_connections: usize,

    /// Idle time after which a connection without requests is dropped.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Time a slow front-end gets to accept one push frame.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Time in-flight calls get to flush their envelopes after the
    /// front-end stops sending. The connection slot is then released.
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:47800".to_string(),
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 16,
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }
}
