//! Protocol transport type definitions

use serde::{Deserialize, Serialize};

/// Terminal outcome of one GET/SET attempt against a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Value applied (SET) or read (GET) and confirmed by the camera
    Ok,
    /// No response within the protocol deadline, retry budget exhausted
    Timeout,
    /// Camera returned a protocol-level refusal; never retried
    Rejected,
    /// Transport-level fault (socket/connection)
    Error,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Result of one parameter operation.
///
/// Produced once per GET/SET attempt; consumed by the ConcurrencyController
/// (to update its adaptive state) and by the AdjustmentEngine (to decide
/// retry/abandon and value trust).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub parameter_name: String,
    /// Value we asked the camera to take (SET only)
    pub requested_value: Option<i64>,
    /// Value confirmed by the camera (GET read, or SET completion)
    pub achieved_value: Option<i64>,
    pub outcome: CommandOutcome,
}

impl CommandResult {
    /// Successful GET
    pub fn read(parameter_name: impl Into<String>, value: i64) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            requested_value: None,
            achieved_value: Some(value),
            outcome: CommandOutcome::Ok,
        }
    }

    /// Successful, acknowledged SET
    pub fn applied(parameter_name: impl Into<String>, value: i64) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            requested_value: Some(value),
            achieved_value: Some(value),
            outcome: CommandOutcome::Ok,
        }
    }

    /// Failed operation
    pub fn failed(
        parameter_name: impl Into<String>,
        requested_value: Option<i64>,
        outcome: CommandOutcome,
    ) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            requested_value,
            achieved_value: None,
            outcome,
        }
    }
}
