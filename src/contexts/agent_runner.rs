use crate::contexts::llm_client::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::contexts::FileCache;
use crate::data::Cache;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// User-turn template for personas whose YAML has no `task`.
pub const DEFAULT_TASK_TEMPLATE: &str =
    "Code under review:\n```python\n{{input.code}}\n```\n\n{{input.transcript?}}";

/// Errors that can occur while filling in a persona template
#[derive(Debug, Error)]
pub enum PopulateError {
    #[error("Required placeholder '{0}' could not be resolved")]
    MissingMandatoryPlaceholder(String),
    #[error("Invalid path '{0}' in placeholder")]
    InvalidPlaceholderPath(String),
    #[error("Agent '{0}' not found in registry")]
    AgentNotFound(String),
    #[error("Agent specification is invalid: {0}")]
    InvalidSpecification(String),
}

/// Errors that can occur while running a persona turn
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Model for agent '{0}' not found")]
    ModelNotFound(String),
    #[error("Model registry is invalid: {0}")]
    InvalidRegistry(String),
    #[error("Agent execution failed: {0}")]
    Chat(#[from] LlmError),
}

#[derive(Debug, Error)]
pub enum AgentRunnerError {
    #[error(transparent)]
    Populate(#[from] PopulateError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Raw persona template as loaded from a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTemplate {
    pub system_prompt: String,
    /// User-turn template; `DEFAULT_TASK_TEMPLATE` when absent.
    pub task: Option<String>,
}

impl AgentTemplate {
    fn task_template(&self) -> &str {
        self.task.as_deref().unwrap_or(DEFAULT_TASK_TEMPLATE)
    }

    /// Everything that shapes the persona's behaviour, for cache keys.
    fn instructions(&self) -> String {
        format!("{}\n---\n{}", self.system_prompt, self.task_template())
    }
}

/// A populated persona ready for execution
#[derive(Debug, Clone)]
pub struct AgentSpecification {
    pub system_prompt: String,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub output: String,
    pub cached: bool,
}

/// Model a persona runs on
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub temperature: f32,
}

/// Loads persona templates by name
pub trait AgentRegistry {
    fn get_template(&self, agent_name: &str) -> Result<AgentTemplate, PopulateError>;
}

/// Resolves the model a persona runs on
pub trait AgentModelRegistry {
    fn get_model(&self, agent_name: &str) -> Result<Model, ExecutionError>;
}

impl<R: AgentRegistry + ?Sized> AgentRegistry for &R {
    fn get_template(&self, agent_name: &str) -> Result<AgentTemplate, PopulateError> {
        (**self).get_template(agent_name)
    }
}

impl<M: AgentModelRegistry + ?Sized> AgentModelRegistry for &M {
    fn get_model(&self, agent_name: &str) -> Result<Model, ExecutionError> {
        (**self).get_model(agent_name)
    }
}

/// Runs one persona turn: template population, model resolution, chat call
/// and the on-disk output cache.
pub struct AgentRunner<'a, T, R, M>
where
    T: Serialize,
    R: AgentRegistry,
    M: AgentModelRegistry,
{
    /// The persona name
    agent: String,
    /// Input data for template population
    input: T,
    agent_registry: R,
    agent_model_registry: M,
    chat: &'a dyn ChatModel,
    /// Cache root; `None` disables caching.
    cache_dir: Option<PathBuf>,
}

impl<'a, T, R, M> AgentRunner<'a, T, R, M>
where
    T: Serialize,
    R: AgentRegistry,
    M: AgentModelRegistry,
{
    pub fn new(
        agent: impl Into<String>,
        input: T,
        agent_registry: R,
        agent_model_registry: M,
        chat: &'a dyn ChatModel,
    ) -> Self {
        Self {
            agent: agent.into(),
            input,
            agent_registry,
            agent_model_registry,
            chat,
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Fills the template's placeholders from the input.
    fn populate(&self, template: &AgentTemplate) -> Result<AgentSpecification, PopulateError> {
        let input_json = serde_json::to_value(&self.input)
            .map_err(|e| PopulateError::InvalidSpecification(e.to_string()))?;

        Ok(AgentSpecification {
            system_prompt: replace_placeholders(&template.system_prompt, &input_json)?,
            task: replace_placeholders(template.task_template(), &input_json)?,
        })
    }

    fn execute(
        &self,
        specification: &AgentSpecification,
        model: &Model,
    ) -> Result<ExecutionResult, ExecutionError> {
        let request = ChatRequest {
            model: model.name.clone(),
            messages: vec![
                ChatMessage::system(specification.system_prompt.clone()),
                ChatMessage::user(specification.task.clone()),
            ],
            temperature: model.temperature,
        };
        let output = self.chat.complete(&request)?;
        Ok(ExecutionResult {
            output,
            cached: false,
        })
    }

    /// Folder hash grouping every cached turn of one persona prompt and model.
    fn generate_instructions_model_hash(&self, agent_instructions: &str, model_name: &str) -> String {
        sha256_hex(&format!("{}:{}", agent_instructions, model_name))
    }

    /// Key over instructions and input, so a change to either is a miss.
    fn generate_cache_key(&self, agent_instructions: &str) -> String {
        let input_json = serde_json::to_string(&self.input).unwrap_or_else(|_| "{}".to_string());
        sha256_hex(&format!("{}:{}", agent_instructions, input_json))
    }

    fn get_cached_artefact(&self, agent_instructions: &str, model_name: &str) -> Option<FileCache> {
        let dir = self.cache_dir.as_deref()?;
        let hash = self.generate_instructions_model_hash(agent_instructions, model_name);
        Some(FileCache::new(Some(dir), hash))
    }

    pub fn run(self) -> Result<ExecutionResult, AgentRunnerError> {
        let template = self.agent_registry.get_template(&self.agent)?;
        let model = self.agent_model_registry.get_model(&self.agent)?;

        let instructions = template.instructions();
        let cache_key = self.generate_cache_key(&instructions);
        let cache = self.get_cached_artefact(&instructions, &model.name);

        if let Some(cached) = cache.as_ref().and_then(|c| c.get(&cache_key)) {
            debug!(agent = %self.agent, "using cached persona output");
            return Ok(ExecutionResult {
                output: cached,
                cached: true,
            });
        }

        let specification = self.populate(&template)?;
        debug!(agent = %self.agent, model = %model.name, "running persona turn");
        let result = self.execute(&specification, &model)?;

        if let Some(cache) = cache {
            cache.set(&cache_key, &result.output);
        }
        Ok(result)
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*(?P<path>[A-Za-z0-9_.]+?)(?P<optional>\?)?\s*\}\}").expect("valid regex")
    })
}

/// Replaces `{{input.a.b}}` (mandatory) and `{{input.a.b?}}` (optional)
/// placeholders with values from `input`.
pub fn replace_placeholders(
    template: &str,
    input: &serde_json::Value,
) -> Result<String, PopulateError> {
    let mut result = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_re().captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let path = caps.name("path").map(|m| m.as_str()).unwrap_or("");
        let is_optional = caps.name("optional").is_some();

        result.push_str(&template[last..whole.start()]);
        last = whole.end();

        match resolve_path(input, path)? {
            Some(value) => result.push_str(&render_value(value)?),
            None if is_optional => {}
            None => return Err(PopulateError::MissingMandatoryPlaceholder(path.to_string())),
        }
    }

    result.push_str(&template[last..]);
    Ok(result)
}

fn render_value(value: &serde_json::Value) -> Result<String, PopulateError> {
    Ok(match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => serde_json::to_string(other)
            .map_err(|e| PopulateError::InvalidSpecification(e.to_string()))?,
    })
}

/// Resolves `input.a.b` against the input value. Paths must start at `input`.
fn resolve_path<'v>(
    value: &'v serde_json::Value,
    path: &str,
) -> Result<Option<&'v serde_json::Value>, PopulateError> {
    let mut parts = path.split('.');
    if parts.next() != Some("input") {
        return Err(PopulateError::InvalidPlaceholderPath(path.to_string()));
    }

    let mut current = value;
    for part in parts {
        match current.get(part) {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}
