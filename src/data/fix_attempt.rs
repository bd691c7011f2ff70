use serde::{Deserialize, Serialize};

use super::Issue;

/// Which fixer produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Pattern,
    Llm,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Pattern => "pattern",
            Strategy::Llm => "llm",
        }
    }
}

/// Verdict on a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Validation {
    Pass,
    Fail { reason: String },
}

impl Validation {
    pub fn fail(reason: impl Into<String>) -> Self {
        Validation::Fail {
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Validation::Pass)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Validation::Pass => None,
            Validation::Fail { reason } => Some(reason),
        }
    }
}

/// Record of one repair-loop iteration.
#[derive(Debug, Clone, Serialize)]
pub struct FixAttempt {
    /// Value of the loop counter when this attempt started.
    pub iteration_index: usize,
    pub issue: Issue,
    pub strategy_used: Strategy,
    /// Name of the deterministic pattern, when one produced the candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Whole-file candidate; absent when the fixer could not produce one.
    pub candidate_code: Option<String>,
    pub validation: Validation,
    /// Set when a pattern candidate was rejected and the LLM was tried instead.
    pub escalated: bool,
}

impl FixAttempt {
    pub fn succeeded(&self) -> bool {
        self.validation.is_pass()
    }
}
