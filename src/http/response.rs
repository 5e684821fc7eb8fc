//! Task response writer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use super::AppState;
use crate::error::{Error, Result};
use crate::types::Task;

/// Structured JSON error with the status the error maps to.
pub(crate) fn error(err: &Error) -> Response {
    (err.status_code(), Json(err.to_json())).into_response()
}

/// Answers with a freshly queued task.
///
/// `run_async` answers `202 Accepted` with the task right away. Otherwise
/// the writer waits up to the response timeout: a success answers `ok` with
/// the task result (no body for `204` and `205`). A failure answers the
/// task's error. A timeout answers `408` with the task as it stands.
pub(crate) async fn task(
    state: &AppState,
    queued: Result<Task>,
    ok: StatusCode,
    run_async: bool,
) -> Response {
    let queued = match queued {
        Ok(task) => task,
        Err(err) => return error(&err),
    };
    if run_async {
        return (StatusCode::ACCEPTED, Json(queued)).into_response();
    }

    let tasks = state.orchestrator.tasks();
    match tasks.wait_timeout(queued.id, state.response_timeout).await {
        Ok(done) => match done.outcome() {
            Ok(_) if is_bodiless(ok) => ok.into_response(),
            Ok(result) => (ok, Json(result.unwrap_or(Value::Null))).into_response(),
            Err(err) => error(&err),
        },
        Err(Error::TimedOut { id }) => {
            tracing::debug!(task = id, "task still in progress");
            let current = tasks.inspect(id).unwrap_or(queued);
            (StatusCode::REQUEST_TIMEOUT, Json(current)).into_response()
        },
        Err(err) => error(&err),
    }
}

fn is_bodiless(status: StatusCode) -> bool {
    matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT)
}
