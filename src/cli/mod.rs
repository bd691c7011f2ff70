use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

mod progress;
mod run_ledger;

use patchcrew::config::Settings;
use patchcrew::contexts::{
    extract_with_policy, CancelFlag, ChatModel, FixDispatcher, GroupChatPanel, LlmFixer, Model,
    OpenAiChat, Orchestrator, OrchestratorError, PatternLibrary, ReviewPanel, TranscriptPanel,
    Validator,
};
use patchcrew::data::{render_transcript, FixReport, FixStatus, Issue, Validation};
use patchcrew::registries::{FileAgentModelRegistry, FileAgentRegistry};
use progress::FixProgress;
use run_ledger::RunLedger;

#[derive(Clone)]
pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
    pub config_path: Option<PathBuf>,
    /// Recorded review conversation to replay instead of calling the panel.
    pub transcript: Option<PathBuf>,
}

pub struct FixOptions {
    pub max_iterations: Option<usize>,
    pub findings: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub in_place: bool,
}

const WORK_DIR: &str = ".patchcrew";

type Panel = Box<dyn ReviewPanel + Send>;

pub async fn review(file: PathBuf, show_transcript: bool, config: &Config) -> Result<()> {
    let code = read_source(&file)?;
    let settings = load_settings(config)?;
    let orchestrator = build_orchestrator(&settings, config)?;

    let outcome = tokio::task::spawn_blocking(move || orchestrator.review_only(&code))
        .await
        .context("Review task panicked")?
        .with_context(|| format!("Review failed for {}", file.display()))?;

    if show_transcript || config.verbose {
        println!("{}", render_transcript(&outcome.conversation));
        println!();
    }

    if outcome.issues.is_empty() {
        println!("✓ No issues found in {}", file.display());
        return Ok(());
    }

    println!("{} issue(s) found in {}:", outcome.issues.len(), file.display());
    for (n, issue) in outcome.issues.iter().enumerate() {
        println!("  {}. {}  ({})", n + 1, issue.summary(), issue.source_agent);
    }
    Ok(())
}

pub async fn fix(file: PathBuf, options: FixOptions, config: &Config) -> Result<()> {
    let code = read_source(&file)?;
    let settings = load_settings(config)?;
    let max_iterations = options
        .max_iterations
        .unwrap_or(settings.repair.max_iterations);
    if max_iterations == 0 {
        anyhow::bail!("--max-iterations must be at least 1");
    }

    let findings = match &options.findings {
        Some(path) => load_findings(path)?,
        None => Vec::new(),
    };
    let orchestrator = build_orchestrator(&settings, config)?;

    let cancel = CancelFlag::new();
    let interrupt = watch_for_interrupt(cancel.clone());
    let dry_run = config.dry_run;
    let task = tokio::task::spawn_blocking(move || {
        run_fix(&orchestrator, &code, findings, max_iterations, &cancel, dry_run)
    });
    let result = task.await.context("Fix task panicked");
    interrupt.abort();
    let Some((report, ledger_dir)) = result?? else {
        println!("✓ No issues found in {}", file.display());
        return Ok(());
    };

    let target = if options.in_place {
        Some(file.clone())
    } else {
        options.output.clone()
    };
    match target {
        Some(path) if config.dry_run => {
            println!("[DRY RUN] Would write fixed code to: {}", path.display());
        }
        Some(path) => {
            fs::write(&path, &report.fixed_code)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Written fixed code to: {}", path.display());
        }
        None => {
            println!();
            print!("{}", report.fixed_code);
        }
    }

    if let Some(dir) = ledger_dir {
        println!("Run ledger: {}", dir.display());
    }

    if report.status == FixStatus::Failed {
        anyhow::bail!(
            "Fix run for {} stopped with {} issue(s) unresolved.",
            file.display(),
            report.issues_unresolved
        );
    }
    Ok(())
}

/// Runs review and repair on the blocking pool. `None` means the review found
/// nothing to fix.
fn run_fix(
    orchestrator: &Orchestrator<Panel>,
    code: &str,
    findings: Vec<Issue>,
    max_iterations: usize,
    cancel: &CancelFlag,
    dry_run: bool,
) -> Result<Option<(FixReport, Option<PathBuf>)>> {
    let review = orchestrator.review_only(code).context("Review failed")?;
    let mut issues = review.issues;
    issues.extend(findings);
    if issues.is_empty() {
        return Ok(None);
    }
    println!(
        "Fixing {} issue(s) with a budget of {} iteration(s)",
        issues.len(),
        max_iterations
    );

    let ledger = if dry_run {
        None
    } else {
        Some(RunLedger::create(Path::new(WORK_DIR))?)
    };
    if let Some(ledger) = &ledger {
        ledger.write_issues(&issues)?;
        debug!(dir = %ledger.dir().display(), "run ledger created");
    }

    let mut progress = FixProgress::new(issues.len(), ledger.as_ref());
    let result = orchestrator.fix_issues(
        code,
        issues,
        max_iterations,
        review.conversation,
        cancel,
        &mut progress,
    );
    for error in progress.ledger_errors() {
        warn!("run ledger: {}", error);
    }

    let report = match result {
        Ok(report) => report,
        Err(OrchestratorError::Aborted(aborted)) => {
            eprintln!("error[fix:aborted]:");
            eprintln!("  {}", aborted);
            if let Some(ledger) = &ledger {
                ledger.write_snapshot(&aborted.snapshot)?;
                eprintln!("  Partial state saved to: {}", ledger.dir().display());
            }
            eprintln!();
            return Err(anyhow::Error::new(*aborted));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(ledger) = &ledger {
        ledger.write_report(&report)?;
    }
    Ok(Some((report, ledger.map(|l| l.dir().to_path_buf()))))
}

/// Prints the issues in a recorded conversation as JSON, in the shape
/// `fix --findings` accepts.
pub fn extract(transcript: PathBuf, config: &Config) -> Result<()> {
    let settings = load_settings(config)?;
    let panel = TranscriptPanel::load(&transcript)?;
    let issues = extract_with_policy(panel.messages(), &settings.extraction_policy());
    let json = serde_json::to_string_pretty(&issues).context("Failed to serialize issues")?;
    println!("{}", json);
    Ok(())
}

pub fn validate(file: PathBuf) -> Result<()> {
    let code = read_source(&file)?;
    let verdict = Validator::new()
        .validate(&code)
        .with_context(|| format!("Failed to validate {}", file.display()))?;

    match verdict {
        Validation::Pass => {
            println!("✓ {} passes validation", file.display());
            Ok(())
        }
        Validation::Fail { reason } => {
            eprintln!("error[validate:fail]:");
            eprintln!("\u{001b}[31m{}\u{001b}[0m", file.display());
            eprintln!("  {}", reason);
            eprintln!();
            anyhow::bail!("Validation failed for {}", file.display());
        }
    }
}

fn read_source(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn load_settings(config: &Config) -> Result<Settings> {
    Settings::load(config.config_path.as_deref()).context("Failed to load configuration")
}

fn load_findings(path: &Path) -> Result<Vec<Issue>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read findings file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Findings file is not a JSON issue list: {}", path.display()))
}

fn build_orchestrator(settings: &Settings, config: &Config) -> Result<Orchestrator<Panel>> {
    let chat: Arc<dyn ChatModel> = Arc::new(
        OpenAiChat::from_settings(&settings.llm, settings.api_key())
            .context("Failed to create LLM client")?,
    );

    let panel: Panel = match &config.transcript {
        Some(path) => Box::new(TranscriptPanel::load(path)?),
        None => {
            let default_model = Model {
                name: settings.llm.model.clone(),
                temperature: settings.llm.review_temperature,
            };
            let panel_chat: Box<dyn ChatModel> = Box::new(Arc::clone(&chat));
            Box::new(
                GroupChatPanel::new(
                    FileAgentRegistry::new(Some(settings.review.agents_dir.clone())),
                    FileAgentModelRegistry::new(
                        Some(settings.review.model_registry.clone()),
                        default_model,
                    ),
                    panel_chat,
                )
                .with_cache_dir(settings.review.cache_dir.clone()),
            )
        }
    };

    let dispatcher = FixDispatcher::new(
        PatternLibrary::builtin(),
        LlmFixer::from_settings(chat, &settings.llm),
    );
    Ok(Orchestrator::new(panel, dispatcher).with_policy(settings.extraction_policy()))
}

/// Cancels the run on Ctrl-C. The fix in flight finishes first.
fn watch_for_interrupt(cancel: CancelFlag) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted: stopping after the current fix");
            cancel.cancel();
        }
    })
}
