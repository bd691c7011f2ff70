use crate::contexts::{AgentRegistry, AgentTemplate, PopulateError};
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use yaml_rust::{Yaml, YamlLoader};

/// Reporting format every reviewer is asked to follow. The issue extractor
/// understands exactly these labels.
const FINDING_FORMAT: &str = "Report each finding as its own block:
- Issue type: <short name>
- Line number: <line>
- Description: <what is wrong and how to fix it>
- Severity: <Critical|High|Medium|Low>";

const CODE_ANALYZER_PROMPT: &str = "You are a code quality expert.

Analyze code for:
- PEP 8 style violations
- Code smells (long functions, duplicate code, god objects)
- Poor naming conventions
- Missing docstrings
- Potential bugs";

const SECURITY_REVIEWER_PROMPT: &str = "You are a security expert.

Check for:
- SQL injection vulnerabilities (string formatting in queries)
- Hardcoded secrets (passwords, API keys)
- Weak cryptography (MD5, SHA1)
- Command injection (os.system, eval, exec)
- Insecure deserialization (pickle)

Mark all security issues as Critical and name the secure alternative.";

const PERFORMANCE_OPTIMIZER_PROMPT: &str = "You are a performance optimization expert.

Analyze for:
- Nested loops (O(n^2) or worse)
- Inefficient string concatenation in loops
- Missing caching opportunities
- Repeated database or API calls
- Inefficient data structures (list vs set for lookups)

State the current complexity and the improved one.";

const REVIEW_ORCHESTRATOR_PROMPT: &str = "You coordinate the code review.

Synthesize the feedback of CodeAnalyzer, SecurityReviewer and PerformanceOptimizer
into a final report with an overall grade (A-F). List every issue on its own line
as `[Critical] <description> (line N)`, using Critical, High, Medium or Low.";

/// Built-in prompt for one of the fixed review personas.
pub fn builtin_template(agent_name: &str) -> Option<AgentTemplate> {
    let body = match agent_name {
        "CodeAnalyzer" => CODE_ANALYZER_PROMPT,
        "SecurityReviewer" => SECURITY_REVIEWER_PROMPT,
        "PerformanceOptimizer" => PERFORMANCE_OPTIMIZER_PROMPT,
        "ReviewOrchestrator" => {
            return Some(AgentTemplate {
                system_prompt: REVIEW_ORCHESTRATOR_PROMPT.to_string(),
                task: None,
            });
        }
        _ => return None,
    };
    Some(AgentTemplate {
        system_prompt: format!("{}\n\n{}", body, FINDING_FORMAT),
        task: None,
    })
}

/// `CodeAnalyzer` -> `code_analyzer`
pub fn persona_file_stem(agent_name: &str) -> String {
    let mut stem = String::with_capacity(agent_name.len() + 4);
    for (i, ch) in agent_name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                stem.push('_');
            }
            stem.push(ch.to_ascii_lowercase());
        } else {
            stem.push(ch);
        }
    }
    stem
}

/// File-based implementation of AgentRegistry.
///
/// Reads `<agents_dir>/<snake_case persona>.yml` and falls back to the
/// built-in persona prompt when no file exists.
#[derive(Clone)]
pub struct FileAgentRegistry {
    agents_dir: PathBuf,
}

impl FileAgentRegistry {
    /// `agents_dir` defaults to `agents`.
    pub fn new(agents_dir: Option<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.unwrap_or_else(|| PathBuf::from("agents")),
        }
    }
}

impl AgentRegistry for FileAgentRegistry {
    fn get_template(&self, agent_name: &str) -> Result<AgentTemplate, PopulateError> {
        let agent_path = self
            .agents_dir
            .join(format!("{}.yml", persona_file_stem(agent_name)));

        if !agent_path.exists() {
            debug!(agent = agent_name, "no persona file, using built-in prompt");
            return builtin_template(agent_name)
                .ok_or_else(|| PopulateError::AgentNotFound(agent_name.to_string()));
        }

        let content = fs::read_to_string(&agent_path).map_err(|e| {
            PopulateError::InvalidSpecification(format!(
                "Failed to read agent specification {}: {}",
                agent_path.display(),
                e
            ))
        })?;
        parse_template(&content)
    }
}

/// Reads `system_prompt` (required) and `task` (optional) from a persona file
fn parse_template(yaml_content: &str) -> Result<AgentTemplate, PopulateError> {
    let docs = YamlLoader::load_from_str(yaml_content)
        .map_err(|e| PopulateError::InvalidSpecification(format!("Invalid YAML: {}", e)))?;

    let doc = docs.first().ok_or_else(|| {
        PopulateError::InvalidSpecification("Empty YAML document".to_string())
    })?;

    let system_prompt = match &doc["system_prompt"] {
        Yaml::String(s) => s.clone(),
        _ => {
            return Err(PopulateError::InvalidSpecification(
                "No system_prompt field found in agent specification".to_string(),
            ));
        }
    };
    let task = doc["task"].as_str().map(str::to_string);

    Ok(AgentTemplate {
        system_prompt,
        task,
    })
}
