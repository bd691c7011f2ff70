//! Sources of review conversations.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::agent_runner::{AgentModelRegistry, AgentRegistry, AgentRunner, AgentRunnerError};
use super::llm_client::ChatModel;
use crate::data::{render_transcript, Message};

pub const USER: &str = "User";
pub const REVIEW_ORCHESTRATOR: &str = "ReviewOrchestrator";
pub const CODE_ANALYZER: &str = "CodeAnalyzer";
pub const SECURITY_REVIEWER: &str = "SecurityReviewer";
pub const PERFORMANCE_OPTIMIZER: &str = "PerformanceOptimizer";

/// Specialist reviewers, in speaking order.
pub const SPECIALISTS: [&str; 3] = [CODE_ANALYZER, SECURITY_REVIEWER, PERFORMANCE_OPTIMIZER];

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("persona {persona} failed: {source}")]
    Persona {
        persona: String,
        #[source]
        source: AgentRunnerError,
    },
    #[error("failed to load transcript {path}: {message}")]
    Transcript { path: PathBuf, message: String },
}

/// Produces the review conversation for a piece of code.
pub trait ReviewPanel {
    fn converse(&self, code: &str) -> Result<Vec<Message>, ReviewError>;
}

impl<P: ReviewPanel + ?Sized> ReviewPanel for Box<P> {
    fn converse(&self, code: &str) -> Result<Vec<Message>, ReviewError> {
        (**self).converse(code)
    }
}

/// Input every persona template is populated from.
#[derive(Debug, Serialize)]
struct TurnInput<'a> {
    code: &'a str,
    transcript: String,
    persona: &'a str,
}

/// Fixed-topology group chat: the user opens, each specialist speaks once
/// seeing everything said before, and the orchestrator closes with a report.
pub struct GroupChatPanel<R, M>
where
    R: AgentRegistry,
    M: AgentModelRegistry,
{
    agents: R,
    models: M,
    chat: Box<dyn ChatModel>,
    cache_dir: Option<PathBuf>,
}

impl<R, M> GroupChatPanel<R, M>
where
    R: AgentRegistry,
    M: AgentModelRegistry,
{
    pub fn new(agents: R, models: M, chat: Box<dyn ChatModel>) -> Self {
        Self {
            agents,
            models,
            chat,
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    fn turn(&self, persona: &str, code: &str, so_far: &[Message]) -> Result<Message, ReviewError> {
        let input = TurnInput {
            code,
            transcript: render_transcript(so_far),
            persona,
        };
        let result = AgentRunner::new(persona, input, &self.agents, &self.models, self.chat.as_ref())
            .with_cache_dir(self.cache_dir.clone())
            .run()
            .map_err(|source| ReviewError::Persona {
                persona: persona.to_string(),
                source,
            })?;
        info!(persona, cached = result.cached, "review turn complete");
        Ok(Message::new(persona, result.output))
    }
}

/// Opening message of every review.
pub fn opening_message(code: &str) -> String {
    format!(
        "Please conduct a comprehensive code review of the following Python code:\n\n```python\n{}\n```",
        code.trim_end_matches('\n')
    )
}

impl<R, M> ReviewPanel for GroupChatPanel<R, M>
where
    R: AgentRegistry,
    M: AgentModelRegistry,
{
    fn converse(&self, code: &str) -> Result<Vec<Message>, ReviewError> {
        let mut conversation = vec![Message::new(USER, opening_message(code))];
        for persona in SPECIALISTS.iter().copied().chain([REVIEW_ORCHESTRATOR]) {
            let message = self.turn(persona, code, &conversation)?;
            conversation.push(message);
        }
        Ok(conversation)
    }
}

/// Replays a recorded conversation regardless of the code it is given.
#[derive(Debug, Clone)]
pub struct TranscriptPanel {
    messages: Vec<Message>,
}

impl TranscriptPanel {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Parses a JSON array of `{speaker, text}` objects.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> Result<Self, ReviewError> {
        let content = fs::read_to_string(path).map_err(|e| ReviewError::Transcript {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| ReviewError::Transcript {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl ReviewPanel for TranscriptPanel {
    fn converse(&self, _code: &str) -> Result<Vec<Message>, ReviewError> {
        Ok(self.messages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::agent_runner::{AgentTemplate, ExecutionError, Model, PopulateError};
    use crate::contexts::llm_client::{ChatRequest, LlmError};
    use std::sync::{Arc, Mutex};

    struct Personas;

    impl AgentRegistry for Personas {
        fn get_template(&self, agent_name: &str) -> Result<AgentTemplate, PopulateError> {
            Ok(AgentTemplate {
                system_prompt: format!("You are {{{{input.persona}}}} ({}).", agent_name),
                task: Some("{{input.transcript}}".to_string()),
            })
        }
    }

    struct OneModel;

    impl AgentModelRegistry for OneModel {
        fn get_model(&self, _agent_name: &str) -> Result<Model, ExecutionError> {
            Ok(Model {
                name: "m".to_string(),
                temperature: 0.7,
            })
        }
    }

    #[derive(Clone, Default)]
    struct Transcriber {
        seen: Arc<Mutex<Vec<ChatRequest>>>,
        fail_on: Option<&'static str>,
    }

    impl ChatModel for Transcriber {
        fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
            let system = request.messages[0].content.clone();
            self.seen.lock().unwrap().push(request.clone());
            if let Some(persona) = self.fail_on {
                if system.contains(persona) {
                    return Err(LlmError::EmptyReply);
                }
            }
            Ok(format!("notes from {}", system))
        }
    }

    #[test]
    fn test_group_chat_topology() {
        let chat = Transcriber::default();
        let panel = GroupChatPanel::new(Personas, OneModel, Box::new(chat.clone()));
        let conversation = panel.converse("x = 1\n").unwrap();

        let speakers: Vec<&str> = conversation.iter().map(|m| m.speaker.as_str()).collect();
        assert_eq!(
            speakers,
            vec![USER, CODE_ANALYZER, SECURITY_REVIEWER, PERFORMANCE_OPTIMIZER, REVIEW_ORCHESTRATOR]
        );
        assert!(conversation[0].text.contains("```python\nx = 1\n```"));
        assert_eq!(
            conversation[1].text,
            "notes from You are CodeAnalyzer (CodeAnalyzer)."
        );

        // Each persona sees every earlier turn.
        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        let orchestrator_view = &seen[3].messages[1].content;
        assert!(orchestrator_view.starts_with("[User]"));
        assert!(orchestrator_view.contains("[PerformanceOptimizer]\nnotes from"));
    }

    #[test]
    fn test_persona_failure_names_the_persona() {
        let chat = Transcriber {
            fail_on: Some("SecurityReviewer"),
            ..Transcriber::default()
        };
        let panel = GroupChatPanel::new(Personas, OneModel, Box::new(chat));
        match panel.converse("x = 1\n") {
            Err(ReviewError::Persona { persona, .. }) => assert_eq!(persona, SECURITY_REVIEWER),
            other => panic!("unexpected {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_transcript_panel_replays() {
        let panel = TranscriptPanel::from_json(
            r#"[{"speaker": "CodeAnalyzer", "text": "Description: x"}, {"speaker": "User", "content": "hi"}]"#,
        )
        .unwrap();
        let conversation = panel.converse("ignored").unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[1].text, "hi");
        assert_eq!(panel.messages().len(), 2);
    }

    #[test]
    fn test_transcript_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            TranscriptPanel::load(&missing),
            Err(ReviewError::Transcript { .. })
        ));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            TranscriptPanel::load(&bad),
            Err(ReviewError::Transcript { .. })
        ));
    }
}
