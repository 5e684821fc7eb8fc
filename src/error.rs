//! Error types for the control plane.
//!
//! Task failures are data: every variant is `Clone` so a completed task can
//! hand its error to any number of waiters.

use std::sync::Arc;

use http::StatusCode;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::filter::FilterError;
use crate::types::TaskId;

/// Errors that can occur while scheduling, executing or aggregating work
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A task, service, volume or snapshot does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up
        kind: &'static str,
        /// The identifier that was not found
        id: String,
    },

    /// An identity-dependent operation was requested without an instance ID
    #[error("missing instance ID for service '{service}'")]
    MissingInstanceId {
        /// The service the instance ID was required for
        service: String,
    },

    /// Device names were requested without the caller's local devices
    #[error("missing local devices for service '{service}'")]
    MissingLocalDevices {
        /// The service the local devices were required for
        service: String,
    },

    /// The filter query parameter failed to compile
    #[error("invalid filter '{filter}': {source}")]
    BadFilter {
        /// The raw filter text
        filter: String,
        /// Why compilation failed
        #[source]
        source: FilterError,
    },

    /// One or more per-service tasks in a fan-out failed
    #[error("batch processing error: {source}")]
    BatchProcess {
        /// Results of the services that succeeded, keyed by service name
        completed: Map<String, Value>,
        /// The first failure encountered
        #[source]
        source: Arc<Error>,
    },

    /// A required request context value is absent
    #[error("missing context key '{key}'")]
    ContextKey {
        /// The missing key
        key: &'static str,
    },

    /// A request context value has an unexpected type
    #[error("context key '{key}' is not a {expected}")]
    ContextType {
        /// The key that was looked up
        key: &'static str,
        /// The type the caller asked for
        expected: &'static str,
    },

    /// An attachments query value could not be parsed
    #[error("invalid attachments mask '{value}'")]
    InvalidMask {
        /// The raw query value
        value: String,
    },

    /// A request body or parameter could not be understood
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A task result did not satisfy its result schema
    #[error("result failed '{schema}' schema validation: {}", .errors.join("; "))]
    SchemaValidation {
        /// Name of the schema
        schema: String,
        /// Individual validation failures
        errors: Vec<String>,
    },

    /// The task's run function panicked
    #[error("task {id} panicked: {message}")]
    TaskPanicked {
        /// The task that panicked
        id: TaskId,
        /// The panic payload, when it was a string
        message: String,
    },

    /// The task cannot be started because it already left the queued state
    #[error("task {id} is not queued")]
    InvalidTask {
        /// The task ID
        id: TaskId,
    },

    /// A synchronous caller stopped waiting for a task
    #[error("timed out waiting for task {id}")]
    TimedOut {
        /// The task that is still in progress
        id: TaskId,
    },

    /// The driver does not support an operation
    #[error("operation '{operation}' is not implemented by driver '{driver}'")]
    NotImplemented {
        /// The unsupported operation
        operation: &'static str,
        /// The driver name
        driver: String,
    },

    /// No storage service is configured under this name
    #[error("unknown storage service '{name}'")]
    UnknownService {
        /// The requested service name
        name: String,
    },

    /// No driver constructor is registered under this name
    #[error("unknown storage driver '{name}'")]
    UnknownDriver {
        /// The requested driver name
        name: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend call failed
    #[error("{driver}: {message}")]
    Backend {
        /// The driver that reported the failure
        driver: String,
        /// The backend's message
        message: String,
    },
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a [`Error::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a [`Error::Backend`].
    pub fn backend(driver: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Creates a [`Error::NotImplemented`].
    pub fn not_implemented(driver: impl Into<String>, operation: &'static str) -> Self {
        Self::NotImplemented {
            operation,
            driver: driver.into(),
        }
    }

    /// HTTP status a synchronous caller receives for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::UnknownService { .. } => StatusCode::NOT_FOUND,
            Self::MissingInstanceId { .. }
            | Self::MissingLocalDevices { .. }
            | Self::BadFilter { .. }
            | Self::InvalidMask { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::TimedOut { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::BatchProcess { .. }
            | Self::ContextKey { .. }
            | Self::ContextType { .. }
            | Self::SchemaValidation { .. }
            | Self::TaskPanicked { .. }
            | Self::InvalidTask { .. }
            | Self::UnknownDriver { .. }
            | Self::Config(_)
            | Self::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured detail carried alongside the message, if any.
    fn data(&self) -> Option<Value> {
        match self {
            Self::BatchProcess { completed, .. } => Some(Value::Object(completed.clone())),
            Self::BadFilter { filter, .. } => Some(json!({ "filter": filter })),
            Self::SchemaValidation { schema, errors } => {
                Some(json!({ "schema": schema, "errors": errors }))
            },
            Self::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
            _ => None,
        }
    }

    /// JSON body used for task records and HTTP error responses.
    ///
    /// ```
    /// use volplane::Error;
    ///
    /// let body = Error::not_found("volume", "vol-1").to_json();
    /// assert_eq!(body["status"], 404);
    /// assert_eq!(body["message"], "volume not found: vol-1");
    /// ```
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "message": self.to_string(),
            "status": self.status_code().as_u16(),
        });
        if let Some(data) = self.data() {
            body["error"] = data;
        }
        body
    }
}
