//! Chooses between a deterministic pattern and the LLM for one issue.

use thiserror::Error;
use tracing::{debug, warn};

use super::llm_fixer::LlmFixer;
use super::pattern_library::{PatternLibrary, PatternOutcome};
use super::validator::{Validator, ValidatorError};
use crate::data::{Issue, Strategy};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("issue has no description")]
    MalformedIssue,
    #[error(transparent)]
    Validator(#[from] ValidatorError),
}

/// Output of a fixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Whole-file replacement text.
    Code(String),
    /// The fixer could not produce code (LLM error, prompt too large, ...).
    Unavailable(String),
}

impl Candidate {
    pub fn code(&self) -> Option<&str> {
        match self {
            Candidate::Code(code) => Some(code),
            Candidate::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub strategy: Strategy,
    /// Pattern name when `strategy` is `Pattern`.
    pub pattern: Option<&'static str>,
    pub candidate: Candidate,
}

pub struct FixDispatcher {
    patterns: PatternLibrary,
    validator: Validator,
    llm: LlmFixer,
}

impl FixDispatcher {
    pub fn new(patterns: PatternLibrary, llm: LlmFixer) -> Self {
        Self {
            patterns,
            validator: Validator::new(),
            llm,
        }
    }

    /// Pattern first, checked with the base validator; otherwise the LLM.
    pub fn fix(&self, code: &str, issue: &Issue) -> Result<Dispatch, DispatchError> {
        if issue.description.trim().is_empty() {
            return Err(DispatchError::MalformedIssue);
        }

        if let PatternOutcome::Fixed { pattern, code: candidate } = self.patterns.try_fix(code, issue) {
            let verdict = self.validator.validate_base(&candidate)?;
            if verdict.is_pass() {
                debug!(pattern, "pattern candidate passed base validation");
                return Ok(Dispatch {
                    strategy: Strategy::Pattern,
                    pattern: Some(pattern),
                    candidate: Candidate::Code(candidate),
                });
            }
            debug!(
                pattern,
                reason = verdict.reason().unwrap_or(""),
                "pattern candidate rejected, falling back to LLM"
            );
        }

        self.escalate(code, issue)
    }

    /// LLM-only path. Fixer errors become `Candidate::Unavailable`.
    pub fn escalate(&self, code: &str, issue: &Issue) -> Result<Dispatch, DispatchError> {
        if issue.description.trim().is_empty() {
            return Err(DispatchError::MalformedIssue);
        }

        let candidate = match self.llm.generate_fix(code, issue) {
            Ok(fixed) => Candidate::Code(fixed),
            Err(e) => {
                warn!(issue = %issue.summary(), error = %e, "LLM fix unavailable");
                Candidate::Unavailable(e.to_string())
            }
        };

        Ok(Dispatch {
            strategy: Strategy::Llm,
            pattern: None,
            candidate,
        })
    }
}
