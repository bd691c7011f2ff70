use std::sync::Arc;
use tracing::{debug, warn};

use super::llm_client::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::config::LlmSettings;
use crate::data::Issue;

pub const FIX_SYSTEM_PROMPT: &str = "You are a code fixing assistant. Return only fixed code.";

/// Asks a chat model to rewrite the whole file for one issue.
pub struct LlmFixer {
    chat: Arc<dyn ChatModel>,
    model: String,
    temperature: f32,
    max_code_chars: usize,
}

impl LlmFixer {
    pub fn new(chat: Arc<dyn ChatModel>, model: impl Into<String>) -> Self {
        Self {
            chat,
            model: model.into(),
            temperature: 0.0,
            max_code_chars: LlmSettings::default().max_code_chars,
        }
    }

    pub fn from_settings(chat: Arc<dyn ChatModel>, settings: &LlmSettings) -> Self {
        Self {
            chat,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_code_chars: settings.max_code_chars,
        }
    }

    pub fn with_max_code_chars(mut self, limit: usize) -> Self {
        self.max_code_chars = limit;
        self
    }

    pub fn build_prompt(code: &str, issue: &Issue) -> String {
        let location = issue
            .line
            .map(|line| format!("\nLine: {}", line))
            .unwrap_or_default();
        format!(
            "Fix this code issue:\n\n\
             Issue: {}\n\
             Severity: {}{}\n\n\
             Code:\n```python\n{}\n```\n\n\
             Return ONLY the fixed code, no explanations.",
            issue.description,
            issue.severity,
            location,
            code.trim_end_matches('\n')
        )
    }

    /// Returns a whole-file candidate. Oversized code is refused rather than
    /// truncated, since a truncated file can only come back truncated.
    pub fn generate_fix(&self, code: &str, issue: &Issue) -> Result<String, LlmError> {
        let chars = code.chars().count();
        if chars > self.max_code_chars {
            warn!(chars, limit = self.max_code_chars, "code too large for a fix prompt");
            return Err(LlmError::PromptTooLarge {
                chars,
                limit: self.max_code_chars,
            });
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(FIX_SYSTEM_PROMPT),
                ChatMessage::user(Self::build_prompt(code, issue)),
            ],
            temperature: self.temperature,
        };

        let reply = self.chat.complete(&request)?;
        debug!(chars = reply.len(), "received fix candidate");
        Ok(unwrap_code_fence(&reply))
    }
}

/// Strips a markdown fence from a reply. A fenced `python` block anywhere in
/// the reply wins; a reply that is entirely one fenced block is unwrapped;
/// anything else is returned as is.
pub fn unwrap_code_fence(reply: &str) -> String {
    if let Some(block) = fenced_block(reply, true) {
        return block;
    }
    let trimmed = reply.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 6 {
        if let Some(block) = fenced_block(trimmed, false) {
            return block;
        }
    }
    reply.to_string()
}

fn fenced_block(text: &str, python_only: bool) -> Option<String> {
    let mut lines = text.lines();
    let mut body = Vec::new();

    loop {
        let line = lines.next()?;
        let trimmed = line.trim();
        if let Some(lang) = trimmed.strip_prefix("```") {
            let lang = lang.trim().to_lowercase();
            if !python_only || lang == "python" || lang == "py" || lang == "python3" {
                break;
            }
        }
    }

    for line in lines {
        if line.trim() == "```" {
            let mut code = body.join("\n");
            code.push('\n');
            return Some(code);
        }
        body.push(line);
    }
    None
}
