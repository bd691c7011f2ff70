mod agent_model_registry;
mod agent_registry;

pub use agent_model_registry::FileAgentModelRegistry;
pub use agent_registry::{builtin_template, persona_file_stem, FileAgentRegistry};
