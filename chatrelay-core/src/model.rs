use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Why a provider stopped generating. Everything except `Length` counts as
/// "complete" for continuation purposes.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolUse,
    Other,
}

impl FinishReason {
    /// True when the segment ended because the provider hit its token budget
    /// and the turn may be continued.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Inbound HTTP body for one chat turn.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTurnRequest {
    pub messages: Vec<ChatMessage>,
    /// Knowledge-base text injected into the system prompt. Opaque here.
    #[serde(default)]
    pub context: String,
    /// Provider selector, looked up verbatim in the registry.
    pub provider: String,
    /// Optional model override; providers fall back to their default model.
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatTurnRequest {
    /// Fail fast before any provider call is issued.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        if self.messages.is_empty() {
            return Err(crate::error::RelayError::Validation(
                "messages must not be empty".into(),
            ));
        }
        if self.provider.trim().is_empty() {
            return Err(crate::error::RelayError::Validation(
                "provider must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Tool invocation is disabled for relayed turns; the wire still carries the
/// setting so providers don't pick tools on their own.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    None,
    Auto,
}

/// What the stream adapter hands to a provider for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub tool_choice: ToolChoice,
}
