//! Bounded iterative repair loop.
//!
//! One [`FixController`] owns one [`FixState`] for one run. Each step takes the
//! highest-severity pending issue, asks the dispatcher for a candidate,
//! validates it and either accepts the whole file or records the failure and
//! leaves an `# UNRESOLVED` marker in the code. Every step consumes exactly one
//! issue and one unit of budget, so a run ends after at most
//! `min(issues, max_iterations)` steps.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::fix_dispatcher::{Candidate, Dispatch, DispatchError, FixDispatcher};
use super::validator::{Validator, ValidatorError};
use crate::data::{
    sort_by_severity, FixAttempt, FixStatus, Issue, Strategy, Termination, Validation,
};

pub const UNRESOLVED_MARKER: &str = "# UNRESOLVED";

const MARKER_FIELD_LIMIT: usize = 160;

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Continue,
    Done,
    Failed,
}

/// Routing decision. An empty queue is `Done` even when the budget is spent.
pub fn route(pending: usize, iteration: usize, max_iterations: usize) -> Route {
    if pending == 0 {
        Route::Done
    } else if iteration >= max_iterations {
        Route::Failed
    } else {
        Route::Continue
    }
}

/// Cooperative cancellation, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FixState {
    original_code: String,
    current_code: String,
    pending: VecDeque<Issue>,
    attempts: Vec<FixAttempt>,
    iteration: usize,
    max_iterations: usize,
    status: FixStatus,
}

/// Owned copy of a [`FixState`], for reports and aborted runs.
#[derive(Debug, Clone, Serialize)]
pub struct FixSnapshot {
    pub original_code: String,
    pub current_code: String,
    pub pending: Vec<Issue>,
    pub attempts: Vec<FixAttempt>,
    pub iteration: usize,
    pub max_iterations: usize,
    pub status: FixStatus,
}

impl FixState {
    /// Queues `issues` in severity order, keeping their relative order within
    /// a tier.
    pub fn new(code: impl Into<String>, mut issues: Vec<Issue>, max_iterations: usize) -> Self {
        let code = code.into();
        sort_by_severity(&mut issues);
        Self {
            original_code: code.clone(),
            current_code: code,
            pending: issues.into(),
            attempts: Vec::new(),
            iteration: 0,
            max_iterations,
            status: FixStatus::Running,
        }
    }

    pub fn original_code(&self) -> &str {
        &self.original_code
    }

    pub fn current_code(&self) -> &str {
        &self.current_code
    }

    pub fn pending(&self) -> &VecDeque<Issue> {
        &self.pending
    }

    pub fn attempts(&self) -> &[FixAttempt] {
        &self.attempts
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn status(&self) -> FixStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status != FixStatus::Running
    }

    pub fn snapshot(&self) -> FixSnapshot {
        FixSnapshot {
            original_code: self.original_code.clone(),
            current_code: self.current_code.clone(),
            pending: self.pending.iter().cloned().collect(),
            attempts: self.attempts.clone(),
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            status: self.status,
        }
    }

    pub fn into_snapshot(self) -> FixSnapshot {
        FixSnapshot {
            original_code: self.original_code,
            current_code: self.current_code,
            pending: self.pending.into(),
            attempts: self.attempts,
            iteration: self.iteration,
            max_iterations: self.max_iterations,
            status: self.status,
        }
    }

    fn finish(&mut self, status: FixStatus) {
        if self.status == FixStatus::Running {
            self.status = status;
        }
    }

    /// Applies one resolved attempt. The only place the queue, code and
    /// counter change.
    fn commit(&mut self, attempt: FixAttempt) {
        self.pending.pop_front();
        match (&attempt.validation, &attempt.candidate_code) {
            (Validation::Pass, Some(code)) => self.current_code = code.clone(),
            (validation, _) => {
                let reason = validation.reason().unwrap_or("no candidate");
                self.current_code = insert_marker(&self.current_code, &attempt.issue, reason);
            }
        }
        self.attempts.push(attempt);
        self.iteration += 1;
    }
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Validator(#[from] ValidatorError),
}

/// A run stopped by an infrastructure or contract failure. The snapshot
/// keeps every attempt committed before the failure.
#[derive(Debug, Error)]
#[error("fix run aborted at iteration {}: {}", .snapshot.iteration, .error)]
pub struct RunAborted {
    pub snapshot: FixSnapshot,
    #[source]
    pub error: FixError,
}

/// Progress hooks. Called after each committed step and once at the end.
pub trait FixObserver {
    fn on_attempt(&mut self, state: &FixState, attempt: &FixAttempt);

    fn on_finish(&mut self, _state: &FixState, _termination: Termination) {}
}

pub struct NoopObserver;

impl FixObserver for NoopObserver {
    fn on_attempt(&mut self, _state: &FixState, _attempt: &FixAttempt) {}
}

#[derive(Debug)]
pub struct FixOutcome {
    pub state: FixState,
    pub termination: Termination,
}

pub struct FixController<'a> {
    state: FixState,
    dispatcher: &'a FixDispatcher,
    validator: &'a Validator,
}

impl<'a> FixController<'a> {
    pub fn new(state: FixState, dispatcher: &'a FixDispatcher, validator: &'a Validator) -> Self {
        Self {
            state,
            dispatcher,
            validator,
        }
    }

    pub fn state(&self) -> &FixState {
        &self.state
    }

    /// Runs one iteration. Returns `Continue` after consuming an issue, or the
    /// terminal route once the loop is over. A failed step leaves the state
    /// exactly as it was before the call.
    pub fn step(&mut self) -> Result<Route, FixError> {
        match self.state.status {
            FixStatus::Done => return Ok(Route::Done),
            FixStatus::Failed => return Ok(Route::Failed),
            FixStatus::Running => {}
        }

        match route(
            self.state.pending.len(),
            self.state.iteration,
            self.state.max_iterations,
        ) {
            Route::Done => {
                self.state.finish(FixStatus::Done);
                return Ok(Route::Done);
            }
            Route::Failed => {
                self.state.finish(FixStatus::Failed);
                return Ok(Route::Failed);
            }
            Route::Continue => {}
        }

        let Some(issue) = self.state.pending.front().cloned() else {
            self.state.finish(FixStatus::Done);
            return Ok(Route::Done);
        };

        info!(
            iteration = self.state.iteration + 1,
            max = self.state.max_iterations,
            issue = %issue.summary(),
            "fixing issue"
        );

        let attempt = self.resolve(issue)?;
        if attempt.succeeded() {
            info!(strategy = attempt.strategy_used.as_str(), "fix accepted");
        } else {
            warn!(
                strategy = attempt.strategy_used.as_str(),
                reason = attempt.validation.reason().unwrap_or(""),
                "fix rejected, issue left unresolved"
            );
        }
        self.state.commit(attempt);
        Ok(Route::Continue)
    }

    /// Steps until the run ends or `cancel` is raised. A cancelled run ends
    /// `Failed` with issues still queued and `iteration < max_iterations`;
    /// `Termination::Cancelled` tells it apart from an exhausted budget.
    pub fn run(
        mut self,
        cancel: &CancelFlag,
        observer: &mut dyn FixObserver,
    ) -> Result<FixOutcome, RunAborted> {
        let termination = loop {
            let next = route(
                self.state.pending.len(),
                self.state.iteration,
                self.state.max_iterations,
            );
            if next == Route::Continue && cancel.is_cancelled() {
                info!(iteration = self.state.iteration, "fix run cancelled");
                self.state.finish(FixStatus::Failed);
                break Termination::Cancelled;
            }

            match self.step() {
                Ok(Route::Continue) => {
                    if let Some(attempt) = self.state.attempts.last() {
                        observer.on_attempt(&self.state, attempt);
                    }
                }
                Ok(Route::Done) => break Termination::Completed,
                Ok(Route::Failed) => break Termination::BudgetExhausted,
                Err(error) => {
                    warn!(error = %error, "fix run aborted");
                    return Err(RunAborted {
                        snapshot: self.state.snapshot(),
                        error,
                    });
                }
            }
        };

        info!(
            status = %self.state.status,
            iterations = self.state.iteration,
            pending = self.state.pending.len(),
            "fix run finished"
        );
        observer.on_finish(&self.state, termination);
        Ok(FixOutcome {
            state: self.state,
            termination,
        })
    }

    fn resolve(&self, issue: Issue) -> Result<FixAttempt, FixError> {
        let current = self.state.current_code.as_str();

        let mut dispatch = self.dispatcher.fix(current, &issue)?;
        let mut validation = self.check(current, &dispatch)?;
        let mut escalated = false;

        if !validation.is_pass() && dispatch.strategy == Strategy::Pattern {
            debug!(
                reason = validation.reason().unwrap_or(""),
                "pattern candidate rejected, escalating to LLM"
            );
            dispatch = self.dispatcher.escalate(current, &issue)?;
            validation = self.check(current, &dispatch)?;
            escalated = true;
        }

        Ok(FixAttempt {
            iteration_index: self.state.iteration,
            issue,
            strategy_used: dispatch.strategy,
            pattern: dispatch.pattern.map(str::to_string),
            candidate_code: dispatch.candidate.code().map(str::to_string),
            validation,
            escalated,
        })
    }

    /// Pattern candidates already passed the base checks in the dispatcher.
    fn check(&self, current: &str, dispatch: &Dispatch) -> Result<Validation, FixError> {
        let code = match &dispatch.candidate {
            Candidate::Unavailable(reason) => {
                return Ok(Validation::fail(format!("no candidate: {}", reason)));
            }
            Candidate::Code(code) => code,
        };
        if code == current {
            return Ok(Validation::fail("candidate is identical to the current code"));
        }
        let verdict = match dispatch.strategy {
            Strategy::Pattern => self.validator.validate_stages(code)?,
            Strategy::Llm => self.validator.validate(code)?,
        };
        Ok(verdict)
    }
}

/// Inserts an `# UNRESOLVED` comment above the issue's line, matching its
/// indentation, or at the top of the file (below a shebang or encoding line)
/// when the line is unknown, out of range, or a backslash continuation.
pub fn insert_marker(code: &str, issue: &Issue, reason: &str) -> String {
    let marker = format!(
        "{} [{}] {} ({})",
        UNRESOLVED_MARKER,
        issue.severity,
        one_line(&issue.description),
        one_line(reason)
    );

    let mut lines: Vec<String> = code.split('\n').map(str::to_string).collect();
    let real_lines = if code.ends_with('\n') {
        lines.len() - 1
    } else {
        lines.len()
    };

    let target = issue.line.and_then(|l| (l as usize).checked_sub(1)).filter(|&idx| {
        idx < real_lines && (idx == 0 || !lines[idx - 1].trim_end().ends_with('\\'))
    });

    match target {
        Some(idx) => {
            let line = &lines[idx];
            let indent = &line[..line.len() - line.trim_start().len()];
            let marked = format!("{}{}", indent, marker);
            lines.insert(idx, marked);
        }
        None => {
            let mut at = 0;
            while at < real_lines.min(2) {
                let line = lines[at].trim_start();
                let header = (at == 0 && line.starts_with("#!"))
                    || (line.starts_with('#') && line.contains("coding"));
                if !header {
                    break;
                }
                at += 1;
            }
            lines.insert(at, marker);
        }
    }

    lines.join("\n")
}

fn one_line(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MARKER_FIELD_LIMIT {
        return flat;
    }
    let cut: String = flat.chars().take(MARKER_FIELD_LIMIT - 3).collect();
    format!("{}...", cut)
}
