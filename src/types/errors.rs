//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Per-call failures never leave the bridge
//! as raised errors: they are rendered into terminal error envelopes through
//! [`Error::to_error_code`], [`Error::status`] and [`Error::to_payload`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::envelope::Status;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// The service name is not declared in the service map.
    #[error("service '{0}' does not have a native implementation")]
    ServiceUnavailable(String),

    /// The plugin behind a service does not implement the requested action.
    #[error("service '{service}' does not have a native implementation for action '{action}'")]
    ActionNotFound { service: String, action: String },

    /// The plugin's configure or initialize phase failed. Sticky.
    #[error("service '{service}' failed to initialize: {message}")]
    InitializationFailure { service: String, message: String },

    /// The plugin's action handler failed or panicked.
    #[error("exception while invoking service action '{service}.{action}': {message}")]
    InvocationException {
        service: String,
        action: String,
        message: String,
    },

    /// A modern plugin settled with something other than handled/unhandled.
    #[error("unexpected plugin exec result from '{service}.{action}': {result}")]
    UnexpectedResult {
        service: String,
        action: String,
        result: Value,
    },

    /// A resource URL resolved outside the application root (404-equivalent).
    #[error("resource '{0}' is outside the application sandbox")]
    SandboxViolation(String),

    /// A service initializer requested a service already initializing on its own path.
    #[error("circular service dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// Unrecoverable misconfiguration, fatal to startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The push channel toward the front-end is gone.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable string code carried in error envelopes.
    pub fn to_error_code(&self) -> &'static str {
        match self {
            Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Error::ActionNotFound { .. } => "ACTION_NOT_FOUND",
            Error::InitializationFailure { .. } => "INITIALIZATION_FAILURE",
            Error::InvocationException { .. } => "INVOCATION_EXCEPTION",
            Error::UnexpectedResult { .. } => "UNEXPECTED_RESULT",
            Error::SandboxViolation(_) => "SANDBOX_VIOLATION",
            Error::CircularDependency(_) => "CIRCULAR_DEPENDENCY",
            Error::Config(_) => "CONFIGURATION",
            Error::ChannelClosed(_) => "CHANNEL_CLOSED",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }

    /// Envelope status for this error: `ERROR` plus its subcategory bit, if any.
    pub fn status(&self) -> Status {
        match self {
            Error::ServiceUnavailable(_) => Status::ERROR.with(Status::ERROR_UNKNOWN_SERVICE),
            Error::ActionNotFound { .. } => Status::ERROR.with(Status::ERROR_UNKNOWN_ACTION),
            Error::UnexpectedResult { .. } => Status::ERROR.with(Status::ERROR_UNEXPECTED_RESULT),
            Error::InvocationException { .. } => {
                Status::ERROR.with(Status::ERROR_INVOCATION_EXCEPTION)
            }
            _ => Status::ERROR,
        }
    }

    /// Error envelope payload: `{code, message}` plus category-specific detail.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "code": self.to_error_code(),
            "message": self.to_string(),
        });
        if let (Some(obj), Some(service)) = (payload.as_object_mut(), self.service()) {
            obj.insert("service".to_string(), Value::String(service.to_string()));
        }
        if let (Some(obj), Error::UnexpectedResult { result, .. }) = (payload.as_object_mut(), self)
        {
            obj.insert("result".to_string(), result.clone());
        }
        payload
    }

    /// Service the error is about, when it is about one.
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::ServiceUnavailable(service)
            | Error::ActionNotFound { service, .. }
            | Error::InitializationFailure { service, .. }
            | Error::InvocationException { service, .. }
            | Error::UnexpectedResult { service, .. } => Some(service),
            _ => None,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn service_unavailable(service: impl Into<String>) -> Self {
        Self::ServiceUnavailable(service.into())
    }

    pub fn action_not_found(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self::ActionNotFound {
            service: service.into(),
            action: action.into(),
        }
    }

    pub fn initialization_failure(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InitializationFailure {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn invocation_exception(
        service: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvocationException {
            service: service.into(),
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn unexpected_result(
        service: impl Into<String>,
        action: impl Into<String>,
        result: Value,
    ) -> Self {
        Self::UnexpectedResult {
            service: service.into(),
            action: action.into(),
            result,
        }
    }

    pub fn sandbox_violation(url: impl Into<String>) -> Self {
        Self::SandboxViolation(url.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits_per_category() {
        let unknown = Error::service_unavailable("Camera");
        assert!(unknown.status().is_error());
        assert!(unknown.status().has(Status::ERROR_UNKNOWN_SERVICE));

        let action = Error::action_not_found("Camera", "zoom");
        assert!(action.status().has(Status::ERROR_UNKNOWN_ACTION));
        assert!(!action.status().has(Status::ERROR_UNKNOWN_SERVICE));

        let init = Error::initialization_failure("Camera", "boom");
        assert_eq!(init.status(), Status::ERROR);
    }

    #[test]
    fn test_payload_carries_code_and_service() {
        let err = Error::action_not_found("Camera", "zoom");
        let payload = err.to_payload();
        assert_eq!(payload["code"], "ACTION_NOT_FOUND");
        assert_eq!(payload["service"], "Camera");
        assert!(payload["message"].as_str().unwrap().contains("zoom"));
    }

    #[test]
    fn test_unexpected_result_payload_keeps_result() {
        let err = Error::unexpected_result("Camera", "snap", json!(42));
        let payload = err.to_payload();
        assert_eq!(payload["code"], "UNEXPECTED_RESULT");
        assert_eq!(payload["result"], 42);
    }

    #[test]
    fn test_circular_dependency_message() {
        let err = Error::CircularDependency(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.to_string(), "circular service dependency: A -> B -> A");
        assert!(err.service().is_none());
    }
}
