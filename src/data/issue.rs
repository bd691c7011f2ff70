use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// How urgent a review finding is. The derived ordering puts `Critical` first,
/// which is the order the repair loop consumes issues in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Maps free-form severity text onto a tier. Anything unrecognized is `Medium`.
    pub fn parse_lenient(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("critical") {
            Severity::Critical
        } else if lower.contains("high") {
            Severity::High
        } else if lower.contains("medium") || lower.contains("moderate") {
            Severity::Medium
        } else if lower.contains("low") || lower.contains("minor") {
            Severity::Low
        } else {
            Severity::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Severity::parse_lenient(&raw))
    }
}

/// One defect raised during review, or supplied by an external analysis tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    /// Reviewer that raised the issue. Provenance only.
    #[serde(default)]
    pub source_agent: String,
    /// 1-based line number. Advisory; may be missing or wrong.
    #[serde(
        default,
        deserialize_with = "deserialize_line",
        skip_serializing_if = "Option::is_none"
    )]
    pub line: Option<u32>,
}

impl Issue {
    pub fn new(
        severity: Severity,
        description: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            description: description.into(),
            source_agent: source_agent.into(),
            line: None,
        }
    }

    /// Attaches a line number. Zero is not a valid 1-based line and is dropped.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = (line > 0).then_some(line);
        self
    }

    /// Lower-cased description, the key pattern predicates match against.
    pub fn normalized_description(&self) -> String {
        self.description.to_lowercase()
    }

    /// Single-line rendering for logs and listings.
    pub fn summary(&self) -> String {
        match self.line {
            Some(line) => format!("[{}] {} (line {})", self.severity, self.description, line),
            None => format!("[{}] {}", self.severity, self.description),
        }
    }
}

fn deserialize_line<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u32>::deserialize(deserializer)?;
    Ok(raw.filter(|line| *line > 0))
}

/// Stable sort by severity tier, so extraction order is kept within a tier.
pub fn sort_by_severity(issues: &mut [Issue]) {
    issues.sort_by_key(|issue| issue.severity);
}
