//! Execution lifecycle states and per-command outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one script execution.
///
/// `Idle` covers an execution that has been registered but not yet picked up
/// by a worker. `Succeeded`, `Failed` and `Terminated` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    /// Every command ran (whatever its exit code) and no stop was requested.
    Succeeded,
    /// An unrecoverable fault aborted the sequence, e.g. a spawn failure.
    Failed,
    /// A stop was requested while the execution was live.
    Terminated,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one command within a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    /// Process exit code (`-1` if the process was ended by a signal).
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
