use serde::{Deserialize, Serialize};

/// One turn of the review conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub speaker: String,
    #[serde(alias = "content")]
    pub text: String,
}

impl Message {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

/// Renders a transcript as `[Speaker]` blocks, the form personas see it in.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}]\n{}", m.speaker, m.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
