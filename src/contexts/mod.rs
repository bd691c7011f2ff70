mod agent_runner;
mod file_cache;
pub mod fix_controller;
pub mod fix_dispatcher;
pub mod issue_extractor;
pub mod llm_client;
pub mod llm_fixer;
pub mod orchestrator;
pub mod pattern_library;
pub mod review_panel;
pub mod validator;

pub use agent_runner::{
    AgentModelRegistry, AgentRegistry, AgentRunner, AgentRunnerError, AgentSpecification,
    AgentTemplate, ExecutionError, ExecutionResult, Model, PopulateError, DEFAULT_TASK_TEMPLATE,
};
pub use file_cache::{FileCache, DEFAULT_CACHE_DIR};
pub use fix_controller::{
    insert_marker, route, CancelFlag, FixController, FixError, FixObserver, FixOutcome,
    FixSnapshot, FixState, NoopObserver, Route, RunAborted, UNRESOLVED_MARKER,
};
pub use fix_dispatcher::{Candidate, Dispatch, DispatchError, FixDispatcher};
pub use issue_extractor::{extract, extract_with_policy, DedupPolicy, ExtractionPolicy};
pub use llm_client::{ChatMessage, ChatModel, ChatRequest, LlmError, OpenAiChat};
pub use llm_fixer::LlmFixer;
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use pattern_library::{FixPattern, PatternLibrary, PatternOutcome};
pub use review_panel::{GroupChatPanel, ReviewError, ReviewPanel, TranscriptPanel};
pub use validator::{ValidationStage, Validator, ValidatorError};
