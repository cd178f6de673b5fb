//! Seams toward the host shell.
//!
//! The bridge never talks to a windowing toolkit directly. Everything it
//! needs from the host is one of these traits:
//! - [`HostWindow`]: the push channel of a front-end window
//! - [`HostApp`]: application-level registrations (default protocol client)
//! - [`ProtocolHost`]: privileged scheme and file-protocol handler registration
//! - [`ReadySignal`]: the host's "ready" event, awaited before initialization
//!
//! [`ChannelWindow`], [`HeadlessApp`] and [`HeadlessProtocolHost`] implement
//! them for hosts without a windowing layer, such as the IPC server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

use crate::envelope::PluginResult;
use crate::plugin::CustomScheme;
use crate::types::{CallbackId, Error, Result};

/// A front-end window results are pushed to.
pub trait HostWindow: Send + Sync + fmt::Debug {
    /// Human-readable window label for logs.
    fn label(&self) -> &str;

    /// Push one envelope to the window, keyed by callback id.
    fn push(&self, callback_id: &CallbackId, result: &PluginResult) -> Result<()>;
}

/// Application-level capabilities of the host.
pub trait HostApp: Send + Sync + fmt::Debug {
    /// Register the application as the OS default handler for `protocol`.
    fn set_as_default_protocol_client(&self, protocol: &str) -> bool;
}

/// Resolver installed for a scheme on a session partition.
pub type ProtocolHandler = Arc<dyn Fn(&str) -> Result<PathBuf> + Send + Sync>;

/// Resource-serving layer of the host.
pub trait ProtocolHost: Send + Sync {
    /// Declare schemes privileged. Must run before the host is ready.
    fn register_schemes_as_privileged(&self, schemes: &[CustomScheme]) -> Result<()>;

    /// Serve `scheme` on `partition` (`None` = default session) through `handler`.
    fn register_file_protocol(
        &self,
        partition: Option<&str>,
        scheme: &str,
        handler: ProtocolHandler,
    ) -> Result<()>;
}

// =============================================================================
// Channel-backed window
// =============================================================================

/// One envelope addressed to a callback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Push {
    pub callback_id: CallbackId,
    pub result: PluginResult,
}

/// [`HostWindow`] that forwards pushes into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelWindow {
    label: String,
    tx: mpsc::UnboundedSender<Push>,
}

impl ChannelWindow {
    pub fn new(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Push>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.into(),
                tx,
            },
            rx,
        )
    }
}

impl HostWindow for ChannelWindow {
    fn label(&self) -> &str {
        &self.label
    }

    fn push(&self, callback_id: &CallbackId, result: &PluginResult) -> Result<()> {
        self.tx
            .send(Push {
                callback_id: callback_id.clone(),
                result: result.clone(),
            })
            .map_err(|_| Error::channel_closed(format!("window '{}' is gone", self.label)))
    }
}

// =============================================================================
// Headless application
// =============================================================================

/// [`HostApp`] for hosts without an OS integration layer; records registrations.
#[derive(Debug, Default)]
pub struct HeadlessApp {
    protocols: Mutex<Vec<String>>,
}

impl HeadlessApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocols registered so far, in registration order.
    pub fn default_protocols(&self) -> Vec<String> {
        self.protocols
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HostApp for HeadlessApp {
    fn set_as_default_protocol_client(&self, protocol: &str) -> bool {
        tracing::info!("registered as default protocol client for '{}'", protocol);
        self.protocols
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(protocol.to_string());
        true
    }
}

// =============================================================================
// Headless protocol host
// =============================================================================

/// [`ProtocolHost`] that keeps registrations in memory and resolves URLs
/// through them. Used by hosts that serve resources themselves.
#[derive(Default)]
pub struct HeadlessProtocolHost {
    privileged: Mutex<Vec<CustomScheme>>,
    handlers: Mutex<Vec<(Option<String>, String, ProtocolHandler)>>,
}

impl HeadlessProtocolHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn privileged_schemes(&self) -> Vec<CustomScheme> {
        self.privileged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(partition, scheme)` pairs with an installed handler.
    pub fn registrations(&self) -> Vec<(Option<String>, String)> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(partition, scheme, _)| (partition.clone(), scheme.clone()))
            .collect()
    }

    /// Serve `url` on `partition` the way a browser session would.
    pub fn resolve(&self, partition: Option<&str>, url: &str) -> Result<PathBuf> {
        let handler = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers
                .iter()
                .find(|(p, scheme, _)| {
                    p.as_deref() == partition
                        && url
                            .strip_prefix(scheme.as_str())
                            .is_some_and(|rest| rest.starts_with("://"))
                })
                .map(|(_, _, handler)| Arc::clone(handler))
        };
        match handler {
            Some(handler) => handler(url),
            None => Err(Error::sandbox_violation(url)),
        }
    }
}

impl ProtocolHost for HeadlessProtocolHost {
    fn register_schemes_as_privileged(&self, schemes: &[CustomScheme]) -> Result<()> {
        self.privileged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(schemes);
        Ok(())
    }

    fn register_file_protocol(
        &self,
        partition: Option<&str>,
        scheme: &str,
        handler: ProtocolHandler,
    ) -> Result<()> {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if handlers
            .iter()
            .any(|(p, s, _)| p.as_deref() == partition && s == scheme)
        {
            return Err(Error::config(format!(
                "protocol '{}' already registered on {}",
                scheme,
                partition.unwrap_or("the default session")
            )));
        }
        handlers.push((partition.map(str::to_string), scheme.to_string(), handler));
        Ok(())
    }
}

impl fmt::Debug for HeadlessProtocolHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessProtocolHost")
            .field("registrations", &self.registrations())
            .finish()
    }
}

// =============================================================================
// Readiness
// =============================================================================

/// Fires the host's ready event.
#[derive(Debug)]
pub struct ReadyTrigger {
    tx: watch::Sender<bool>,
}

impl ReadyTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// Awaitable view of the host's ready event.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<bool>,
}

impl ReadySignal {
    /// A signal that fires when the returned trigger does.
    pub fn new() -> (ReadyTrigger, ReadySignal) {
        let (tx, rx) = watch::channel(false);
        (ReadyTrigger { tx }, ReadySignal { rx })
    }

    /// A signal that is already fired.
    pub fn ready() -> ReadySignal {
        let (_, rx) = watch::channel(true);
        ReadySignal { rx }
    }

    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the ready event. Fails if the trigger is dropped without firing.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| Error::channel_closed("host shut down before becoming ready"))
    }
}
