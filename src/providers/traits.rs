use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::discovery::DiscoveryFilter;

/// A tool invocation requested by the model. `id` is provider-assigned and
/// opaque; `input` is a raw JSON object shaped by the tool's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The outcome of one tool invocation, paired to a [`ToolCall`] by id.
/// `content` carries the error message when `is_error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// One complete assistant reply: text, requested tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// True when the model wants at least one tool invoked.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A conversation entry. Tool results get their own variant here; the wire
/// layer collapses them back into the role the backend expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationMessage {
    User { content: String },
    Assistant(AssistantTurn),
    ToolResults { results: Vec<ToolResult> },
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(turn: AssistantTurn) -> Self {
        Self::Assistant(turn)
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults { results }
    }

    /// Wire-level role of this entry.
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } | Self::ToolResults { .. } => "user",
            Self::Assistant(_) => "assistant",
        }
    }
}

/// A tool definition as advertised to the model: name, human description,
/// and a JSON-schema object describing the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One increment of a streaming response. The final delta carries `done`.
#[derive(Debug, Clone, Default)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub tool_call_delta: Option<ToolCallDelta>,
    pub error: Option<String>,
    pub done: bool,
}

impl ChatDelta {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Incremental tool-call fragment within a stream. Fragments sharing an
/// index belong to the same call; `arguments_delta` concatenates into the
/// call's JSON input.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// Provider-class failures. A pool retries `BackendUnavailable` against the
/// next candidate; everything else surfaces to the agent loop.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("request rejected: {0}")]
    RequestRejected(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Options shared by every provider construction path.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Model id; empty means auto-pick from the backend's advertised set.
    pub model: String,
    pub max_tokens: u32,
    pub discovery_timeout: Duration,
    pub filter: DiscoveryFilter,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            discovery_timeout: Duration::from_secs(3),
            filter: DiscoveryFilter::default(),
        }
    }
}

/// One LLM backend behind a uniform chat contract.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Currently configured model id.
    fn model(&self) -> String;

    fn set_model(&mut self, model: &str);

    /// Model ids the backend advertises.
    fn models(&self) -> Vec<String>;

    /// Block until the backend returns one complete assistant turn.
    async fn chat(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError>;

    /// Stream the assistant turn as deltas through `delta_tx`, ending with a
    /// terminal `done` delta, and return the assembled turn. The default
    /// implementation falls back to the blocking form and emits the whole
    /// reply as a single delta.
    async fn chat_stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
        delta_tx: mpsc::Sender<ChatDelta>,
    ) -> Result<AssistantTurn, ProviderError> {
        let turn = self.chat(system_prompt, conversation, tools).await?;
        if !turn.text.is_empty() {
            let _ = delta_tx.send(ChatDelta::content(turn.text.clone())).await;
        }
        for (index, call) in turn.tool_calls.iter().enumerate() {
            let _ = delta_tx
                .send(ChatDelta {
                    tool_call_delta: Some(ToolCallDelta {
                        index,
                        id: Some(call.id.clone()),
                        name: Some(call.name.clone()),
                        arguments_delta: Some(call.input.to_string()),
                    }),
                    ..ChatDelta::default()
                })
                .await;
        }
        let _ = delta_tx.send(ChatDelta::done()).await;
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roles_match_wire_collapse() {
        assert_eq!(ConversationMessage::user("hi").role(), "user");
        assert_eq!(
            ConversationMessage::assistant(AssistantTurn::text_only("yo")).role(),
            "assistant"
        );
        assert_eq!(
            ConversationMessage::tool_results(vec![ToolResult::ok("1", "out")]).role(),
            "user"
        );
    }

    #[test]
    fn assistant_turn_helpers() {
        let plain = AssistantTurn::text_only("done");
        assert!(!plain.has_tool_calls());

        let with_tools = AssistantTurn {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "shell".into(),
                input: serde_json::json!({}),
            }],
        };
        assert!(with_tools.has_tool_calls());
    }

    #[test]
    fn tool_result_constructors_set_error_flag() {
        assert!(!ToolResult::ok("1", "fine").is_error);
        let err = ToolResult::error("2", "boom");
        assert!(err.is_error);
        assert_eq!(err.content, "boom");
    }

    #[test]
    fn conversation_message_serializes_tagged() {
        let msg = ConversationMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"User\""));

        let msg = ConversationMessage::tool_results(vec![ToolResult::error("1", "no")]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ToolResults\""));
        assert!(json.contains("\"is_error\":true"));
    }

    #[test]
    fn default_options() {
        let opts = ProviderOptions::default();
        assert!(opts.model.is_empty());
        assert_eq!(opts.max_tokens, 4096);
        assert_eq!(opts.discovery_timeout, Duration::from_secs(3));
    }
}
