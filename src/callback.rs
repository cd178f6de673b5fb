//! Per-invocation callback context.
//!
//! The only way results leave a plugin. Every envelope is passed through the
//! cycle-safe payload transform and pushed to the calling window under the
//! call's callback id. Sending never fails toward the plugin: a vanished
//! window is logged and the envelope dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::envelope::{Payload, PluginResult};
use crate::host::HostWindow;
use crate::types::{CallbackId, Error};

/// Handle a plugin uses to report progress and the terminal result of one call.
#[derive(Clone)]
pub struct CallbackContext {
    callback_id: CallbackId,
    window: Arc<dyn HostWindow>,
    finished: Arc<AtomicBool>,
}

impl CallbackContext {
    pub fn new(callback_id: CallbackId, window: Arc<dyn HostWindow>) -> Self {
        Self {
            callback_id,
            window,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn callback_id(&self) -> &CallbackId {
        &self.callback_id
    }

    /// Whether a terminal envelope has been sent.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Non-terminal OK envelope. May be sent any number of times.
    pub fn progress(&self, data: impl Into<Payload>) {
        self.send_plugin_result(PluginResult::progress(&data.into()));
    }

    /// Terminal OK envelope. Pass `None::<Payload>` (or `Payload::Undefined`) for no data.
    pub fn success(&self, data: impl Into<Payload>) {
        self.send_plugin_result(PluginResult::ok(Some(&data.into())));
    }

    /// Terminal ERROR envelope.
    pub fn error(&self, data: impl Into<Payload>) {
        self.send_plugin_result(PluginResult::error(&data.into()));
    }

    /// Terminal error envelope for a bridge-side failure, with its status bits.
    pub fn fail(&self, err: &Error) {
        self.send_plugin_result(PluginResult::from_error(err));
    }

    /// Send a caller-built result as is.
    pub fn send_plugin_result(&self, result: PluginResult) {
        if result.is_terminal() && self.finished.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                callback_id = %self.callback_id,
                status = %result.status,
                "second terminal result for one call"
            );
        } else if !result.is_terminal() && self.is_finished() {
            tracing::warn!(callback_id = %self.callback_id, "progress after terminal result");
        }

        tracing::debug!(
            callback_id = %self.callback_id,
            window = self.window.label(),
            status = %result.status,
            keep_callback = result.keep_callback,
            "push result"
        );
        if let Err(e) = self.window.push(&self.callback_id, &result) {
            tracing::warn!(callback_id = %self.callback_id, "result dropped: {}", e);
        }
    }
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("callback_id", &self.callback_id)
            .field("window", &self.window.label())
            .field("finished", &self.is_finished())
            .finish()
    }
}
