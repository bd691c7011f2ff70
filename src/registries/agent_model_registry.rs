use crate::contexts::{AgentModelRegistry, ExecutionError, Model};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use yaml_rust::{Yaml, YamlLoader};

/// File-based implementation of AgentModelRegistry.
///
/// Maps persona names to models, in either of two shapes:
///
/// ```yaml
/// CodeAnalyzer: gpt-4o-mini
/// SecurityReviewer:
///   model: gpt-4
///   temperature: 0.2
/// ```
///
/// Personas missing from the file (or a missing file) get the defaults.
#[derive(Clone)]
pub struct FileAgentModelRegistry {
    registry_path: PathBuf,
    default_model: Model,
}

impl FileAgentModelRegistry {
    pub fn new(registry_path: Option<PathBuf>, default_model: Model) -> Self {
        Self {
            registry_path: registry_path
                .unwrap_or_else(|| PathBuf::from("agents/agent_model_registry.yml")),
            default_model,
        }
    }

    fn load_registry(&self) -> Result<HashMap<String, Model>, ExecutionError> {
        if !self.registry_path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.registry_path).map_err(|e| {
            ExecutionError::InvalidRegistry(format!(
                "Failed to read agent model registry {}: {}",
                self.registry_path.display(),
                e
            ))
        })?;

        parse_registry(&content, &self.default_model)
    }
}

impl AgentModelRegistry for FileAgentModelRegistry {
    fn get_model(&self, agent_name: &str) -> Result<Model, ExecutionError> {
        let registry = self.load_registry()?;
        Ok(registry
            .get(agent_name)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone()))
    }
}

fn yaml_f32(value: &Yaml) -> Option<f32> {
    match value {
        Yaml::Real(_) => value.as_f64().map(|v| v as f32),
        Yaml::Integer(i) => Some(*i as f32),
        _ => None,
    }
}

/// Parses the registry; entries in an unknown shape get the default model
fn parse_registry(
    yaml_content: &str,
    default_model: &Model,
) -> Result<HashMap<String, Model>, ExecutionError> {
    let docs = YamlLoader::load_from_str(yaml_content)
        .map_err(|e| ExecutionError::InvalidRegistry(format!("Invalid registry YAML: {}", e)))?;

    let Some(doc) = docs.first() else {
        return Ok(HashMap::new());
    };

    let mut registry = HashMap::new();
    if let Some(hash) = doc.as_hash() {
        for (key, value) in hash {
            let Some(name) = key.as_str() else {
                continue;
            };
            let model = match value {
                Yaml::String(model) => Model {
                    name: model.clone(),
                    temperature: default_model.temperature,
                },
                Yaml::Hash(_) => Model {
                    name: value["model"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| default_model.name.clone()),
                    temperature: yaml_f32(&value["temperature"])
                        .unwrap_or(default_model.temperature),
                },
                _ => default_model.clone(),
            };
            registry.insert(name.to_string(), model);
        }
    }

    Ok(registry)
}
