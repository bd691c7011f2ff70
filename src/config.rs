//! Settings loaded from `patchcrew.yml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! The API key itself never lives in the file; `llm.api_key_env` names the
//! environment variable that holds it (`.env` is loaded by the binary).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::contexts::{DedupPolicy, ExtractionPolicy, DEFAULT_CACHE_DIR};

pub const DEFAULT_CONFIG_FILE: &str = "patchcrew.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub review: ReviewSettings,
    pub extraction: ExtractionSettings,
    pub repair: RepairSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Model used for fix requests and for personas without a registry entry.
    pub model: String,
    /// Sampling temperature for fix requests.
    pub temperature: f32,
    /// Sampling temperature for review personas without a registry entry.
    pub review_temperature: f32,
    pub timeout_secs: u64,
    /// Code longer than this is never sent in a fix prompt.
    pub max_code_chars: usize,
    pub api_key_env: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.0,
            review_temperature: 0.7,
            timeout_secs: 120,
            max_code_chars: 24_000,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// Directory holding `<persona>.yml` prompt overrides.
    pub agents_dir: PathBuf,
    /// Persona → model mapping.
    pub model_registry: PathBuf,
    /// Agent turn cache root; `None` disables caching.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            agents_dir: PathBuf::from("agents"),
            model_registry: PathBuf::from("agents/agent_model_registry.yml"),
            cache_dir: Some(PathBuf::from(DEFAULT_CACHE_DIR)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Only turns from these speakers are parsed. Empty means every speaker.
    pub speakers: Vec<String>,
    pub dedup: DedupPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairSettings {
    pub max_iterations: usize,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

impl Settings {
    /// Loads `path`, or `patchcrew.yml` in the working directory when `path` is
    /// `None`. A missing default file yields defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !explicit && !path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(content)
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn extraction_policy(&self) -> ExtractionPolicy {
        let speakers = &self.extraction.speakers;
        ExtractionPolicy {
            speakers: (!speakers.is_empty()).then(|| speakers.clone()),
            dedup: self.extraction.dedup,
        }
    }
}
