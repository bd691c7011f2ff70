//! Blocking chat-completion client for OpenAI-compatible endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::LlmSettings;

/// Maximum length of a response body quoted in an error.
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured (set {0})")]
    MissingApiKey(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("http error: {0}")]
    Http(String),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed API response: {0}")]
    Malformed(String),
    #[error("model returned an empty reply")]
    EmptyReply,
    #[error("prompt too large: code is {chars} chars, limit is {limit}")]
    PromptTooLarge { chars: usize, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// A text generator. Implementations impose their own timeout.
pub trait ChatModel: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

impl<C: ChatModel + ?Sized> ChatModel for std::sync::Arc<C> {
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        (**self).complete(request)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyContent,
}

#[derive(Deserialize)]
struct ReplyContent {
    /// Null when the reply was refused or filtered.
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    api_key_env: String,
    timeout_secs: u64,
}

impl OpenAiChat {
    /// Builds a client from settings. A missing key is reported on first use,
    /// so review-only runs over a recorded transcript need no credentials.
    pub fn from_settings(settings: &LlmSettings, api_key: Option<String>) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            api_key_env: settings.api_key_env.clone(),
            timeout_secs: settings.timeout_secs,
        })
    }
}

impl ChatModel for OpenAiChat {
    fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))?;

        debug!(model = %request.model, messages = request.messages.len(), "sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Http(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: sanitize_api_response(&body),
            });
        }

        parse_reply(&body)
    }
}

/// Pulls `choices[0].message.content` out of a chat-completion body.
pub fn parse_reply(body: &str) -> Result<String, LlmError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::Malformed(format!("{} in {}", e, sanitize_api_response(body))))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    if content.trim().is_empty() {
        return Err(LlmError::EmptyReply);
    }
    Ok(content)
}

/// Truncates a response body and hides it entirely if it looks like it
/// carries credentials.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated: String = content.chars().take(MAX_ERROR_CONTENT_LEN).collect();
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted)".to_string();
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"x = 1\n"}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_parse_reply_null_or_missing_content() {
        let null = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert!(matches!(parse_reply(null), Err(LlmError::EmptyReply)));
        let none = r#"{"choices":[]}"#;
        assert!(matches!(parse_reply(none), Err(LlmError::EmptyReply)));
        assert!(matches!(parse_reply("not json"), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn test_sanitize_redacts_and_truncates() {
        assert_eq!(
            sanitize_api_response("invalid api_key provided: sk-abc"),
            "(response details redacted)"
        );
        let long = "x".repeat(500);
        assert_eq!(sanitize_api_response(&long).len(), MAX_ERROR_CONTENT_LEN);
    }

    #[test]
    fn test_missing_key_fails_without_network() {
        let settings = LlmSettings {
            api_key_env: "PATCHCREW_TEST_KEY".to_string(),
            ..LlmSettings::default()
        };
        let chat = OpenAiChat::from_settings(&settings, None).unwrap();
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
        };
        match chat.complete(&request) {
            Err(LlmError::MissingApiKey(var)) => assert_eq!(var, "PATCHCREW_TEST_KEY"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let settings = LlmSettings {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..LlmSettings::default()
        };
        let chat = OpenAiChat::from_settings(&settings, Some("k".to_string())).unwrap();
        assert_eq!(chat.endpoint, "http://localhost:8080/v1/chat/completions");
    }
}
