use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use patchcrew::contexts::FixSnapshot;
use patchcrew::data::{FixAttempt, FixReport, Issue};

const RUNS_DIR: &str = "runs";

/// On-disk record of one `fix` run:
///
/// ```text
/// <root>/runs/<UTC timestamp>/
///   issues.json
///   attempt_<n>/{issue.json, candidate.py, validation.txt}
///   report.json      (or snapshot.json when the run aborted)
///   fixed.py
/// ```
pub struct RunLedger {
    dir: PathBuf,
}

impl RunLedger {
    pub fn create(root: &Path) -> Result<Self> {
        let base = root.join(RUNS_DIR);
        fs::create_dir_all(&base)
            .with_context(|| format!("Failed to create {}", base.display()))?;
        let ts = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        // Two runs in the same second get distinct folders.
        let mut dir = base.join(&ts);
        let mut n = 1;
        while dir.exists() {
            dir = base.join(format!("{}-{}", ts, n));
            n += 1;
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_issues(&self, issues: &[Issue]) -> Result<()> {
        let json = serde_json::to_string_pretty(issues).context("Failed to serialize issues")?;
        fs::write(self.dir.join("issues.json"), json).context("Failed to write issues.json")
    }

    pub fn write_attempt(&self, attempt: &FixAttempt) -> Result<()> {
        let attempt_dir = self.dir.join(format!("attempt_{}", attempt.iteration_index + 1));
        fs::create_dir_all(&attempt_dir)
            .with_context(|| format!("Failed to create {}", attempt_dir.display()))?;

        let issue = serde_json::to_string_pretty(&attempt.issue)
            .context("Failed to serialize attempt issue")?;
        fs::write(attempt_dir.join("issue.json"), issue).context("Failed to write issue.json")?;

        if let Some(code) = &attempt.candidate_code {
            fs::write(attempt_dir.join("candidate.py"), code)
                .context("Failed to write candidate.py")?;
        }

        let mut verdict = format!("strategy: {}\n", attempt.strategy_used.as_str());
        if let Some(pattern) = &attempt.pattern {
            verdict.push_str(&format!("pattern: {}\n", pattern));
        }
        if attempt.escalated {
            verdict.push_str("escalated: true\n");
        }
        match attempt.validation.reason() {
            None => verdict.push_str("result: pass\n"),
            Some(reason) => verdict.push_str(&format!("result: fail\nreason: {}\n", reason)),
        }
        fs::write(attempt_dir.join("validation.txt"), verdict)
            .context("Failed to write validation.txt")
    }

    pub fn write_report(&self, report: &FixReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        fs::write(self.dir.join("report.json"), json).context("Failed to write report.json")?;
        fs::write(self.dir.join("fixed.py"), &report.fixed_code).context("Failed to write fixed.py")
    }

    pub fn write_snapshot(&self, snapshot: &FixSnapshot) -> Result<()> {
        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        fs::write(self.dir.join("snapshot.json"), json).context("Failed to write snapshot.json")?;
        fs::write(self.dir.join("fixed.py"), &snapshot.current_code)
            .context("Failed to write fixed.py")
    }
}
