//! Turns a free-form review conversation into structured issues.
//!
//! Recognized line shapes (case-insensitive; an optional `-`, `*`, `•`, `+`
//! bullet or `1.`/`1)` ordinal may precede the label, and the label may be
//! wrapped in `**`/`__`):
//!
//! | line                          | effect                                   |
//! |-------------------------------|------------------------------------------|
//! | `Issue type: <text>`          | starts a new record, sets its type       |
//! | `Issue: <text>`               | same as `Issue type`                     |
//! | `Description: <text>`         | sets the description                     |
//! | `Severity: <text>`            | sets the severity (`Priority:` too)      |
//! | `Line number: <text>`         | first integer of the value (`Line:` too) |
//! | `[Critical] <text>`           | a complete issue on its own line         |
//!
//! A label that repeats on a record which already has that field closes the
//! record and opens a new one, so repeated label blocks in one message yield
//! several issues. Extraction never fails; unparseable text contributes
//! nothing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::data::{Issue, Message, Severity};

/// What to do with issues that two reviewers both raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Keep every extracted issue as its own queue entry.
    #[default]
    KeepAll,
    /// Drop later issues with the same line and the same first 40 characters
    /// of description. The comparison is case-sensitive.
    ByLineAndDescription,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionPolicy {
    /// Only parse turns from these speakers; `None` parses every turn.
    pub speakers: Option<Vec<String>>,
    pub dedup: DedupPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    IssueType,
    Description,
    Severity,
    Line,
}

#[derive(Debug, Default)]
struct PendingIssue {
    issue_type: Option<String>,
    description: Option<String>,
    severity: Option<Severity>,
    line: Option<u32>,
}

impl PendingIssue {
    fn has_subject(&self) -> bool {
        self.issue_type.is_some() || self.description.is_some()
    }

    fn has(&self, label: Label) -> bool {
        match label {
            Label::IssueType => self.issue_type.is_some(),
            Label::Description => self.description.is_some(),
            Label::Severity => self.severity.is_some(),
            Label::Line => self.line.is_some(),
        }
    }

    fn finish(self, speaker: &str) -> Option<Issue> {
        let description = match (self.issue_type, self.description) {
            (Some(kind), Some(desc)) => {
                if desc.to_lowercase().contains(&kind.to_lowercase()) {
                    desc
                } else {
                    format!("{}: {}", kind, desc)
                }
            }
            (Some(kind), None) => kind,
            (None, Some(desc)) => desc,
            (None, None) => return None,
        };

        let mut issue = Issue::new(
            self.severity.unwrap_or(Severity::Medium),
            description,
            speaker,
        );
        issue.line = self.line;
        Some(issue)
    }
}

/// Extracts issues from every turn, in conversation order.
pub fn extract(conversation: &[Message]) -> Vec<Issue> {
    extract_with_policy(conversation, &ExtractionPolicy::default())
}

/// Extracts issues, applying a speaker filter and duplicate policy.
pub fn extract_with_policy(conversation: &[Message], policy: &ExtractionPolicy) -> Vec<Issue> {
    let mut issues = Vec::new();

    for message in conversation {
        if let Some(speakers) = &policy.speakers {
            if !speakers.iter().any(|s| s.eq_ignore_ascii_case(&message.speaker)) {
                continue;
            }
        }

        let found = extract_from_message(&message.speaker, &message.text);
        debug!(
            speaker = %message.speaker,
            count = found.len(),
            "parsed review turn"
        );
        issues.extend(found);
    }

    let total = issues.len();
    let issues = match policy.dedup {
        DedupPolicy::KeepAll => issues,
        DedupPolicy::ByLineAndDescription => dedup_by_line_and_description(issues),
    };

    if issues.is_empty() && !conversation.is_empty() {
        info!(
            messages = conversation.len(),
            "no issue-shaped lines found in review conversation"
        );
    } else {
        info!(extracted = total, kept = issues.len(), "extracted review issues");
    }

    issues
}

/// Extracts issues from the text of one turn.
pub fn extract_from_message(speaker: &str, text: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let mut current = PendingIssue::default();

    for line in text.lines() {
        if let Some(issue) = parse_tagged_line(speaker, line) {
            if let Some(done) = std::mem::take(&mut current).finish(speaker) {
                issues.push(done);
            }
            issues.push(issue);
            continue;
        }

        let Some((label, value)) = parse_label_line(line) else {
            continue;
        };

        let opens_record = match label {
            Label::IssueType => current.has_subject(),
            other => current.has(other),
        };
        if opens_record {
            if let Some(done) = std::mem::take(&mut current).finish(speaker) {
                issues.push(done);
            }
        }

        match label {
            Label::IssueType => current.issue_type = Some(value),
            Label::Description => current.description = Some(value),
            Label::Severity => current.severity = Some(Severity::parse_lenient(&value)),
            Label::Line => current.line = first_line_number(&value),
        }
    }

    if let Some(done) = current.finish(speaker) {
        issues.push(done);
    }

    issues
}

fn parse_label_line(line: &str) -> Option<(Label, String)> {
    let caps = label_re().captures(line)?;
    let label_text = caps.name("label")?.as_str().to_lowercase();
    let label = if label_text.starts_with("issue") {
        Label::IssueType
    } else if label_text == "description" {
        Label::Description
    } else if label_text == "severity" || label_text == "priority" {
        Label::Severity
    } else {
        Label::Line
    };

    let value = clean_value(caps.name("value").map(|m| m.as_str()).unwrap_or(""));
    if value.is_empty() {
        return None;
    }
    if label == Label::Line && first_line_number(&value).is_none() {
        return None;
    }
    Some((label, value))
}

fn parse_tagged_line(speaker: &str, line: &str) -> Option<Issue> {
    let caps = tagged_re().captures(line)?;
    let severity = Severity::parse_lenient(caps.name("sev")?.as_str());
    let description = clean_value(caps.name("desc")?.as_str());
    if description.is_empty() {
        return None;
    }

    let line_number = inline_line_re()
        .captures(&description)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0);

    let mut issue = Issue::new(severity, description, speaker);
    issue.line = line_number;
    Some(issue)
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches("**")
        .trim_end_matches("__")
        .trim()
        .trim_matches('`')
        .trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_line_number(value: &str) -> Option<u32> {
    number_re()
        .find(value)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

fn dedup_by_line_and_description(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen: HashSet<(Option<u32>, String)> = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| {
            let prefix: String = issue.description.chars().take(40).collect();
            seen.insert((issue.line, prefix))
        })
        .collect()
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*•+]\s*|\d+[.)]\s*)?(?:\*\*|__)?(?P<label>issue\s+type|issue|description|severity|priority|line\s+numbers?|lines?)(?:\*\*|__)?\s*:\s*(?:\*\*|__)?(?P<value>.*)$",
        )
        .expect("valid regex")
    })
}

fn tagged_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*•+]\s*|\d+[.)]\s*)?(?:\*\*)?\[(?P<sev>critical|high|medium|low)\](?:\*\*)?\s*[:\-–]?\s*(?P<desc>.+)$",
        )
        .expect("valid regex")
    })
}

fn inline_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bline\s*(?:number\s*)?:?\s*(\d+)").expect("valid regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}
