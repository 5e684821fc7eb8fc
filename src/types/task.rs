//! Task records.
//!
//! A [`Task`] is a point-in-time copy of a registry entry. Copies taken
//! after the completion signal fires are final.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::Error;

/// Registry-scoped task identifier. The first task of a registry is `1`.
pub type TaskId = u64;

/// Task lifecycle state.
///
/// ```text
/// Queued -> Running -> Success
///                   -> Error
/// Queued -> Error          (task could not start)
/// ```
///
/// # Examples
///
/// ```
/// use volplane::TaskState;
///
/// assert!(TaskState::Queued.can_transition_to(&TaskState::Running));
/// assert!(!TaskState::Success.can_transition_to(&TaskState::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Tracked but not started.
    Queued,
    /// The run function is executing.
    Running,
    /// Finished without an error (terminal).
    Success,
    /// Finished with an error (terminal).
    Error,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl TaskState {
    /// Returns `true` for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns `true` if moving from this state to `next` goes forward.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Error),
            Self::Running => matches!(next, Self::Success | Self::Error),
            Self::Success | Self::Error => false,
        }
    }
}

/// A unit of asynchronous work as seen by callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Epoch seconds.
    pub queue_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<i64>,
    pub state: TaskState,
    /// Name of the schema a successful result is validated against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<Error>,
}

impl Task {
    pub(crate) fn queued(id: TaskId, name: String, user: Option<String>) -> Self {
        Self {
            id,
            name,
            user,
            queue_time: chrono::Utc::now().timestamp(),
            start_time: None,
            complete_time: None,
            state: TaskState::Queued,
            result_schema: None,
            result: None,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Converts a completed task into its outcome.
    ///
    /// A task that has not completed yields `Ok(None)`.
    pub fn outcome(&self) -> Result<Option<Value>, Error> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.result.clone()),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => err.to_json().serialize(serializer),
        None => serializer.serialize_none(),
    }
}
