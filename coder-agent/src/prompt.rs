// ABOUTME: Prompt input accepted by every adapter: plain text or ordered role messages.
// ABOUTME: Serializes the message form deterministically into a single backend prompt.

use serde::{Deserialize, Serialize};

/// One message of a multi-message prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptMessage {
    /// "system", "user", "assistant", or any backend-specific role
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PromptInput {
    Text(String),
    Messages(Vec<PromptMessage>),
}

impl PromptInput {
    /// Render to the single string every CLI backend accepts.
    ///
    /// Messages keep their order, one per line, role before content.
    pub fn to_prompt(&self) -> String {
        match self {
            PromptInput::Text(text) => text.clone(),
            PromptInput::Messages(messages) => messages
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for PromptInput {
    fn from(text: &str) -> Self {
        PromptInput::Text(text.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(text: String) -> Self {
        PromptInput::Text(text)
    }
}

impl From<Vec<PromptMessage>> for PromptInput {
    fn from(messages: Vec<PromptMessage>) -> Self {
        PromptInput::Messages(messages)
    }
}
