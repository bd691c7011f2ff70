//! Review-and-fix runs driven end to end through the orchestrator, with a
//! recorded review conversation and a scripted model standing in for the LLM.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use patchcrew::contexts::{
    CancelFlag, ChatModel, ChatRequest, FixDispatcher, FixObserver, FixState, LlmError, LlmFixer,
    NoopObserver, Orchestrator, PatternLibrary, TranscriptPanel, Validator,
};
use patchcrew::data::{FixAttempt, FixStatus, Issue, Message, Severity, Strategy, Termination};

struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ChatModel for ScriptedChat {
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Http("no scripted reply left".to_string())))
    }
}

fn orchestrator(conversation: Vec<Message>, chat: Arc<ScriptedChat>) -> Orchestrator<TranscriptPanel> {
    let dispatcher = FixDispatcher::new(PatternLibrary::builtin(), LlmFixer::new(chat, "gpt-4"));
    Orchestrator::new(TranscriptPanel::new(conversation), dispatcher).with_validator(Validator::new())
}

fn review(speaker: &str, text: &str) -> Vec<Message> {
    vec![
        Message::new("User", "Please review this code."),
        Message::new(speaker, text),
    ]
}

/// Records the iteration counter seen after every committed step.
#[derive(Default)]
struct IterationLog {
    iterations: Vec<usize>,
    finished: Option<Termination>,
}

impl FixObserver for IterationLog {
    fn on_attempt(&mut self, state: &FixState, _attempt: &FixAttempt) {
        self.iterations.push(state.iteration());
    }

    fn on_finish(&mut self, _state: &FixState, termination: Termination) {
        self.finished = Some(termination);
    }
}

const SQL_CODE: &str = r#"import sqlite3

def find_user(conn, username):
    query = f"SELECT * FROM users WHERE name = '{username}'"
    cursor = conn.cursor()
    cursor.execute(query)
    return cursor.fetchall()
"#;

const MD5_CODE: &str = r#"import hashlib

def fingerprint(data):
    return hashlib.md5(data).hexdigest()
"#;

const WORKER_CODE: &str = r#"import threading

counter = 0

def work():
    global counter
    counter += 1
"#;

const WORKER_FIXED: &str = r#"import threading

counter = 0
lock = threading.Lock()

def work():
    global counter
    with lock:
        counter += 1
"#;

#[test]
fn sql_injection_is_fixed_by_pattern_in_one_iteration() {
    let chat = ScriptedChat::new(vec![]);
    let o = orchestrator(
        review(
            "SecurityReviewer",
            "Description: SQL injection vulnerability\nSeverity: critical\nLine: 4",
        ),
        chat.clone(),
    );

    let report = o.review_and_fix(SQL_CODE, 5).unwrap();

    assert_eq!(report.status, FixStatus::Done);
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].strategy_used, Strategy::Pattern);
    assert_eq!(report.attempts[0].pattern.as_deref(), Some("sql-injection"));
    assert!(report.attempts[0].succeeded());
    assert!(report.fixed_code.contains("cursor.execute(query, (username,))"));
    assert!(!report.fixed_code.contains("f\"SELECT"));
    assert_eq!(report.original_code, SQL_CODE);
    assert_eq!(chat.request_count(), 0);
}

#[test]
fn weak_hash_is_rewritten_with_matching_arity() {
    let o = orchestrator(
        review(
            "SecurityReviewer",
            "Description: Weak MD5 cryptography\nSeverity: critical",
        ),
        ScriptedChat::new(vec![]),
    );

    let report = o.review_and_fix(MD5_CODE, 5).unwrap();

    assert_eq!(report.status, FixStatus::Done);
    assert_eq!(report.issues_fixed, 1);
    assert!(report.fixed_code.contains("hashlib.sha256(data).hexdigest()"));
    assert!(!report.fixed_code.contains("md5"));
}

#[test]
fn unmatched_issue_falls_through_to_llm() {
    let chat = ScriptedChat::new(vec![Ok(format!("```python\n{}```", WORKER_FIXED))]);
    let o = orchestrator(
        review(
            "PerformanceOptimizer",
            "Description: Race condition in worker pool\nSeverity: high",
        ),
        chat.clone(),
    );

    let report = o.review_and_fix(WORKER_CODE, 5).unwrap();

    assert_eq!(report.status, FixStatus::Done);
    assert_eq!(report.attempts[0].strategy_used, Strategy::Llm);
    assert!(report.attempts[0].pattern.is_none());
    assert_eq!(report.fixed_code, WORKER_FIXED);
    assert_eq!(chat.request_count(), 1);
}

#[test]
fn budget_of_one_leaves_second_issue_pending() {
    let o = orchestrator(
        review(
            "CodeAnalyzer",
            "1. [Critical] SQL injection in find_user\n2. [Low] Missing docstring on find_user",
        ),
        ScriptedChat::new(vec![]),
    );

    let report = o.review_and_fix(SQL_CODE, 1).unwrap();

    assert_eq!(report.status, FixStatus::Failed);
    assert_eq!(report.termination, Termination::BudgetExhausted);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].severity, Severity::Low);
}

#[test]
fn failed_llm_fix_marks_issue_and_run_continues() {
    let chat = ScriptedChat::new(vec![Ok("def broken(:\n".to_string())]);
    let o = orchestrator(
        review(
            "CodeAnalyzer",
            "Description: Race condition in worker pool\nSeverity: high\nLine: 7\n\nDescription: Weak MD5 hash\nSeverity: low",
        ),
        chat,
    );
    let code = format!("{}\n{}", MD5_CODE, WORKER_CODE);
    let mut log = IterationLog::default();

    let report = o
        .review_and_fix_with(&code, 10, Vec::new(), &CancelFlag::new(), &mut log)
        .unwrap();

    assert_eq!(report.status, FixStatus::Done);
    assert_eq!(report.issues_fixed, 1);
    assert_eq!(report.issues_unresolved, 1);
    assert!(!report.attempts[0].succeeded());
    assert_eq!(report.attempts[0].strategy_used, Strategy::Llm);
    assert!(!report.attempts[0].escalated);
    assert!(report.attempts[0].validation.reason().unwrap().starts_with("syntax error"));
    assert!(report.fixed_code.contains("# UNRESOLVED [high] Race condition in worker pool"));
    assert!(report.fixed_code.contains("hashlib.sha256(data)"));
    assert_eq!(log.iterations, vec![1, 2]);
    assert_eq!(log.finished, Some(Termination::Completed));
}

#[test]
fn external_findings_join_the_queue_in_severity_order() {
    let o = orchestrator(
        review("CodeAnalyzer", "Description: Missing docstring\nSeverity: low"),
        ScriptedChat::new(vec![]),
    );
    let findings = vec![Issue::new(Severity::Critical, "Weak MD5 hash", "bandit").with_line(4)];
    let mut log = IterationLog::default();

    let report = o
        .review_and_fix_with(MD5_CODE, 1, findings, &CancelFlag::new(), &mut log)
        .unwrap();

    assert_eq!(report.issues_found, 2);
    assert_eq!(report.attempts[0].issue.source_agent, "bandit");
    assert!(report.attempts[0].succeeded());
    assert_eq!(report.pending[0].description, "Missing docstring");
    assert_eq!(log.finished, Some(Termination::BudgetExhausted));
}

#[test]
fn cancelled_run_stops_before_first_iteration() {
    let o = orchestrator(
        review("SecurityReviewer", "Description: Weak MD5 hash\nSeverity: high"),
        ScriptedChat::new(vec![]),
    );
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = o
        .review_and_fix_with(MD5_CODE, 3, Vec::new(), &cancel, &mut NoopObserver)
        .unwrap();

    assert_eq!(report.status, FixStatus::Failed);
    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.iterations, 0);
    assert_eq!(report.fixed_code, MD5_CODE);
    assert_eq!(report.pending.len(), 1);
}

#[test]
fn conversation_without_findings_needs_no_fixes() {
    let o = orchestrator(
        review("CodeAnalyzer", "The code is clean and well structured."),
        ScriptedChat::new(vec![]),
    );
    let outcome = o.review_only(MD5_CODE).unwrap();
    assert!(outcome.issues.is_empty());
    assert_eq!(outcome.conversation.len(), 2);

    let report = o.review_and_fix(MD5_CODE, 3).unwrap();
    assert_eq!(report.status, FixStatus::Done);
    assert_eq!(report.iterations, 0);
}
