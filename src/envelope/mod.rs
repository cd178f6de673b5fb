//! Result envelope - the wire-level unit pushed back to the front-end.
//!
//! Every logical call produces zero or more progress envelopes
//! (`keepCallback = true`) followed by exactly one terminal envelope.

pub mod payload;

pub use payload::{Payload, MAX_DEPTH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::Error;

/// Envelope status: `OK` or `ERROR`, optionally with error-subcategory bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(u32);

impl Status {
    pub const OK: Status = Status(1);
    pub const ERROR: Status = Status(2);

    /// The service name is not declared.
    pub const ERROR_UNKNOWN_SERVICE: Status = Status(4);
    /// The service has no such action.
    pub const ERROR_UNKNOWN_ACTION: Status = Status(8);
    /// A modern plugin settled with neither handled nor unhandled.
    pub const ERROR_UNEXPECTED_RESULT: Status = Status(16);
    /// The action handler failed on the host side.
    pub const ERROR_INVOCATION_EXCEPTION: Status = Status(32);
    /// Reserved for the front-end's own transport failures; never sent by the host.
    pub const ERROR_INVOCATION_EXCEPTION_FRONTEND: Status = Status(64);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Combine with a subcategory bit.
    pub const fn with(self, bit: Status) -> Status {
        Status(self.0 | bit.0)
    }

    pub const fn has(self, bit: Status) -> bool {
        self.0 & bit.0 == bit.0
    }

    pub const fn is_ok(self) -> bool {
        self.has(Status::OK)
    }

    pub const fn is_error(self) -> bool {
        self.has(Status::ERROR)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "ERROR({:#x})", self.0)
        } else {
            write!(f, "OK")
        }
    }
}

/// One pushed result for a callback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub status: Status,
    /// Already passed through the cycle-safe transform; `null` when absent.
    #[serde(default)]
    pub data: Value,
    /// More results will follow for the same callback id.
    #[serde(default)]
    pub keep_callback: bool,
}

impl PluginResult {
    pub fn new(status: Status, data: Option<&Payload>, keep_callback: bool) -> Self {
        Self {
            status,
            data: data.map(Payload::to_json).unwrap_or(Value::Null),
            keep_callback,
        }
    }

    /// Non-terminal OK result.
    pub fn progress(data: &Payload) -> Self {
        Self::new(Status::OK, Some(data), true)
    }

    /// Terminal OK result.
    pub fn ok(data: Option<&Payload>) -> Self {
        Self::new(Status::OK, data, false)
    }

    /// Terminal ERROR result.
    pub fn error(data: &Payload) -> Self {
        Self::new(Status::ERROR, Some(data), false)
    }

    /// Terminal error envelope for a bridge-side failure.
    pub fn from_error(err: &Error) -> Self {
        Self {
            status: err.status(),
            data: err.to_payload(),
            keep_callback: false,
        }
    }

    pub fn set_keep_callback(&mut self, value: bool) {
        self.keep_callback = value;
    }

    pub fn is_terminal(&self) -> bool {
        !self.keep_callback
    }
}
