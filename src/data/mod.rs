mod cache;
mod conversation;
mod fix_attempt;
mod fix_report;
mod issue;

pub use cache::Cache;
pub use conversation::{Message, render_transcript};
pub use fix_attempt::{FixAttempt, Strategy, Validation};
pub use fix_report::{FixReport, FixStatus, ReviewOutcome, Termination};
pub use issue::{Issue, Severity, sort_by_severity};
