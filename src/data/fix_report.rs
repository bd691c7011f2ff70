use serde::Serialize;
use std::fmt;

use super::{FixAttempt, Issue, Message};

/// Lifecycle of a repair run. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixStatus {
    Running,
    Done,
    Failed,
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FixStatus::Running => "running",
            FixStatus::Done => "done",
            FixStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every queued issue was consumed.
    Completed,
    /// The iteration budget ran out with issues still queued.
    BudgetExhausted,
    /// The caller cancelled between iterations.
    Cancelled,
}

/// Result of `review_only`.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub issues: Vec<Issue>,
    pub conversation: Vec<Message>,
}

/// Result of `review_and_fix`.
#[derive(Debug, Clone, Serialize)]
pub struct FixReport {
    pub original_code: String,
    pub fixed_code: String,
    pub issues_found: usize,
    pub issues_fixed: usize,
    /// Attempts that did not stick plus issues never attempted.
    pub issues_unresolved: usize,
    pub attempts: Vec<FixAttempt>,
    pub pending: Vec<Issue>,
    pub iterations: usize,
    pub max_iterations: usize,
    pub status: FixStatus,
    pub termination: Termination,
    pub conversation: Vec<Message>,
}
