//! Public entry points: review a file, or review it and then repair it.

use thiserror::Error;
use tracing::info;

use super::fix_controller::{
    CancelFlag, FixController, FixObserver, FixState, NoopObserver, RunAborted,
};
use super::fix_dispatcher::FixDispatcher;
use super::issue_extractor::{extract_with_policy, ExtractionPolicy};
use super::review_panel::{ReviewError, ReviewPanel};
use super::validator::Validator;
use crate::data::{FixReport, FixStatus, Issue, Message, ReviewOutcome, Termination};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("max_iterations must be at least 1")]
    InvalidBudget,
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Aborted(#[from] Box<RunAborted>),
}

pub struct Orchestrator<P: ReviewPanel> {
    panel: P,
    dispatcher: FixDispatcher,
    validator: Validator,
    policy: ExtractionPolicy,
}

impl<P: ReviewPanel> Orchestrator<P> {
    pub fn new(panel: P, dispatcher: FixDispatcher) -> Self {
        Self {
            panel,
            dispatcher,
            validator: Validator::new(),
            policy: ExtractionPolicy::default(),
        }
    }

    /// Validator used by the repair loop. Its extra stages apply to every
    /// candidate the loop checks.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_policy(mut self, policy: ExtractionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs the review conversation and extracts its issues, in extraction
    /// order.
    pub fn review_only(&self, code: &str) -> Result<ReviewOutcome, ReviewError> {
        let conversation = self.panel.converse(code)?;
        let issues = extract_with_policy(&conversation, &self.policy);
        info!(
            turns = conversation.len(),
            issues = issues.len(),
            "review complete"
        );
        Ok(ReviewOutcome {
            issues,
            conversation,
        })
    }

    pub fn review_and_fix(
        &self,
        code: &str,
        max_iterations: usize,
    ) -> Result<FixReport, OrchestratorError> {
        self.review_and_fix_with(
            code,
            max_iterations,
            Vec::new(),
            &CancelFlag::new(),
            &mut NoopObserver,
        )
    }

    /// Reviews, appends external `findings` to the extracted issues, and runs
    /// the repair loop over all of them.
    pub fn review_and_fix_with(
        &self,
        code: &str,
        max_iterations: usize,
        findings: Vec<Issue>,
        cancel: &CancelFlag,
        observer: &mut dyn FixObserver,
    ) -> Result<FixReport, OrchestratorError> {
        if max_iterations == 0 {
            return Err(OrchestratorError::InvalidBudget);
        }

        let review = self.review_only(code)?;
        let mut issues = review.issues;
        issues.extend(findings);

        self.fix_issues(code, issues, max_iterations, review.conversation, cancel, observer)
    }

    /// Repair loop over a known issue list, without a review.
    pub fn fix_issues(
        &self,
        code: &str,
        issues: Vec<Issue>,
        max_iterations: usize,
        conversation: Vec<Message>,
        cancel: &CancelFlag,
        observer: &mut dyn FixObserver,
    ) -> Result<FixReport, OrchestratorError> {
        if max_iterations == 0 {
            return Err(OrchestratorError::InvalidBudget);
        }

        let issues_found = issues.len();
        if issues.is_empty() {
            info!("no issues to fix");
            return Ok(FixReport {
                original_code: code.to_string(),
                fixed_code: code.to_string(),
                issues_found: 0,
                issues_fixed: 0,
                issues_unresolved: 0,
                attempts: Vec::new(),
                pending: Vec::new(),
                iterations: 0,
                max_iterations,
                status: FixStatus::Done,
                termination: Termination::Completed,
                conversation,
            });
        }

        let state = FixState::new(code, issues, max_iterations);
        let outcome = FixController::new(state, &self.dispatcher, &self.validator)
            .run(cancel, observer)
            .map_err(Box::new)?;

        let termination = outcome.termination;
        let snapshot = outcome.state.into_snapshot();
        let issues_fixed = snapshot.attempts.iter().filter(|a| a.succeeded()).count();
        let issues_unresolved = snapshot.attempts.len() - issues_fixed + snapshot.pending.len();

        Ok(FixReport {
            original_code: snapshot.original_code,
            fixed_code: snapshot.current_code,
            issues_found,
            issues_fixed,
            issues_unresolved,
            attempts: snapshot.attempts,
            pending: snapshot.pending,
            iterations: snapshot.iteration,
            max_iterations,
            status: snapshot.status,
            termination,
            conversation,
        })
    }
}
