use std::time::Instant;

use patchcrew::contexts::{FixObserver, FixState};
use patchcrew::data::{FixAttempt, Termination};

use super::run_ledger::RunLedger;

/// Prints one line per repair attempt and a summary at the end, and mirrors
/// each attempt into the run ledger when there is one.
pub struct FixProgress<'a> {
    total: usize,
    fixed: usize,
    failed: usize,
    start_time: Instant,
    ledger: Option<&'a RunLedger>,
    ledger_errors: Vec<String>,
}

impl<'a> FixProgress<'a> {
    pub fn new(total: usize, ledger: Option<&'a RunLedger>) -> Self {
        Self {
            total,
            fixed: 0,
            failed: 0,
            start_time: Instant::now(),
            ledger,
            ledger_errors: Vec::new(),
        }
    }

    pub fn ledger_errors(&self) -> &[String] {
        &self.ledger_errors
    }
}

impl FixObserver for FixProgress<'_> {
    fn on_attempt(&mut self, state: &FixState, attempt: &FixAttempt) {
        let step = format!("({}/{})", state.iteration(), state.max_iterations());
        let via = match &attempt.pattern {
            Some(pattern) => format!("{} {}", attempt.strategy_used.as_str(), pattern),
            None => attempt.strategy_used.as_str().to_string(),
        };

        if attempt.succeeded() {
            self.fixed += 1;
            println!("✓ {} Fixed {} via {}", step, attempt.issue.summary(), via);
        } else {
            self.failed += 1;
            eprintln!(
                "✗ {} Unresolved {} via {}: {}",
                step,
                attempt.issue.summary(),
                via,
                attempt.validation.reason().unwrap_or("")
            );
        }

        if let Some(ledger) = self.ledger {
            if let Err(e) = ledger.write_attempt(attempt) {
                self.ledger_errors.push(format!("{:#}", e));
            }
        }
    }

    fn on_finish(&mut self, state: &FixState, termination: Termination) {
        let elapsed = self.start_time.elapsed();
        let outcome = match termination {
            Termination::Completed => "completed",
            Termination::BudgetExhausted => "iteration budget exhausted",
            Termination::Cancelled => "cancelled",
        };
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Issues:     {}", self.total);
        println!("  Fixed:      {}", self.fixed);
        println!("  Unresolved: {}", self.failed);
        println!("  Not tried:  {}", state.pending().len());
        println!("  Status:     {} ({})", state.status(), outcome);
        println!("  Duration:   {:.2}s", elapsed.as_secs_f64());
        println!("{}", "=".repeat(60));
    }
}
