use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one supervised server process.
///
/// `Starting → Running → Exited(code) | Crashed(signal)`, then either back
/// to `Starting` (restart) or one of the terminal states `Stopped`/`Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SupervisorState {
    Starting,
    Running,
    Exited(i32),
    Crashed(i32),
    Stopped,
    Failed,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::Failed)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Starting => f.write_str("starting"),
            SupervisorState::Running => f.write_str("running"),
            SupervisorState::Exited(code) => write!(f, "exited({code})"),
            SupervisorState::Crashed(signal) => write!(f, "crashed(signal {signal})"),
            SupervisorState::Stopped => f.write_str("stopped"),
            SupervisorState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub state: SupervisorState,
    pub at: DateTime<Utc>,
}
