//! Task execution.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;

use super::registry::TaskEntry;
use crate::error::{Error, Result};
use crate::schema::ResultSchema;
use crate::types::TaskId;

/// Runs `run` for `entry` and records the outcome.
///
/// A panic inside `run` becomes [`Error::TaskPanicked`]. A successful,
/// non-null result is checked against `schema` when `validate` is set.
pub(crate) async fn execute<F>(
    entry: &TaskEntry,
    schema: Option<&ResultSchema>,
    validate: bool,
    run: F,
) where
    F: Future<Output = Result<Value>> + Send,
{
    if !entry.start() {
        tracing::warn!(task = entry.id(), "task already started, skipping");
        return;
    }
    let id = entry.id();
    tracing::debug!(task = id, "task running");

    let outcome = match AssertUnwindSafe(run).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panicked(id, payload)),
    };

    let outcome = match (outcome, schema) {
        (Ok(value), Some(schema)) if validate && !value.is_null() => {
            schema.validate(&value).map(|()| value)
        },
        (outcome, _) => outcome,
    };

    match &outcome {
        Ok(_) => tracing::debug!(task = id, "task succeeded"),
        Err(err) => tracing::debug!(task = id, error = %err, "task failed"),
    }
    entry.finish(outcome);
}

/// Converts a panic payload into a task error.
pub(crate) fn panicked(id: TaskId, payload: Box<dyn Any + Send>) -> Error {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(task = id, %message, "task panicked");
    Error::TaskPanicked { id, message }
}
