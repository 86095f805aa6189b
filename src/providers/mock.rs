use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use super::traits::{
    AssistantTurn, ConversationMessage, Provider, ProviderError, ToolCall, ToolSpec,
};

/// One queued reply for the mock backend.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
}

/// What one `chat` invocation looked like, kept for assertions.
#[derive(Debug, Clone)]
pub struct RecordedChat {
    pub system_prompt: String,
    pub conversation: Vec<ConversationMessage>,
    pub tool_names: Vec<String>,
}

/// Deterministic provider substitute that replays a queued sequence of
/// assistant turns. Every invocation is recorded; an exhausted queue yields
/// an empty assistant turn, which ends the caller's turn cleanly.
pub struct MockProvider {
    queue: Mutex<VecDeque<MockResponse>>,
    recorded: Mutex<Vec<RecordedChat>>,
    model: String,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            model: "mock-model".into(),
        }
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        let provider = Self::new();
        provider.lock_queue().extend(responses);
        provider
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.lock_queue().push_back(MockResponse::Text(text.into()));
    }

    pub fn queue_tool_call(&self, name: impl Into<String>, input: serde_json::Value) {
        self.lock_queue().push_back(MockResponse::ToolCall {
            name: name.into(),
            input,
        });
    }

    /// Clear both the response queue and the invocation history.
    pub fn reset(&self) {
        self.lock_queue().clear();
        self.lock_recorded().clear();
    }

    pub fn chat_count(&self) -> usize {
        self.lock_recorded().len()
    }

    pub fn recorded_chats(&self) -> Vec<RecordedChat> {
        self.lock_recorded().clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<MockResponse>> {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_recorded(&self) -> std::sync::MutexGuard<'_, Vec<RecordedChat>> {
        self.recorded
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }

    async fn chat(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantTurn, ProviderError> {
        self.lock_recorded().push(RecordedChat {
            system_prompt: system_prompt.to_string(),
            conversation: conversation.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let next = self.lock_queue().pop_front();
        Ok(match next {
            Some(MockResponse::Text(text)) => AssistantTurn::text_only(text),
            Some(MockResponse::ToolCall { name, input }) => AssistantTurn {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call_{}", Uuid::new_v4().simple()),
                    name,
                    input,
                }],
            },
            None => AssistantTurn::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_queue_in_order() {
        let mock = MockProvider::new();
        mock.queue_tool_call("read_file", json!({"path": "a"}));
        mock.queue_text("done");

        let first = mock.chat("", &[], &[]).await.unwrap();
        assert!(first.has_tool_calls());
        assert_eq!(first.tool_calls[0].name, "read_file");
        assert!(first.tool_calls[0].id.starts_with("call_"));

        let second = mock.chat("", &[], &[]).await.unwrap();
        assert_eq!(second.text, "done");
        assert!(!second.has_tool_calls());
    }

    #[tokio::test]
    async fn exhausted_queue_yields_empty_turn() {
        let mock = MockProvider::new();
        let turn = mock.chat("", &[], &[]).await.unwrap();
        assert!(turn.text.is_empty());
        assert!(!turn.has_tool_calls());
    }

    #[tokio::test]
    async fn records_every_invocation() {
        let mock = MockProvider::new();
        mock.queue_text("hi");

        let conversation = vec![ConversationMessage::user("hello")];
        let tools = vec![ToolSpec {
            name: "shell".into(),
            description: String::new(),
            input_schema: json!({}),
        }];
        mock.chat("system", &conversation, &tools).await.unwrap();

        assert_eq!(mock.chat_count(), 1);
        let recorded = mock.recorded_chats();
        assert_eq!(recorded[0].system_prompt, "system");
        assert_eq!(recorded[0].conversation.len(), 1);
        assert_eq!(recorded[0].tool_names, vec!["shell"]);
    }

    #[tokio::test]
    async fn reset_clears_queue_and_history() {
        let mock = MockProvider::new();
        mock.queue_text("a");
        mock.chat("", &[], &[]).await.unwrap();

        mock.reset();
        assert_eq!(mock.chat_count(), 0);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn chat_stream_falls_back_to_whole_turns() {
        let mock = MockProvider::new();
        mock.queue_tool_call("shell", json!({"command": "ls"}));

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let turn = mock.chat_stream("", &[], &[], tx).await.unwrap();
        assert!(turn.has_tool_calls());

        let mut saw_tool_delta = false;
        let mut saw_done = false;
        while let Some(delta) = rx.recv().await {
            if let Some(tool_delta) = &delta.tool_call_delta {
                assert_eq!(tool_delta.name.as_deref(), Some("shell"));
                saw_tool_delta = true;
            }
            if delta.done {
                saw_done = true;
            }
        }
        assert!(saw_tool_delta);
        assert!(saw_done, "stream must end with a terminal done delta");
    }

    #[tokio::test]
    async fn tool_call_ids_are_unique() {
        let mock = MockProvider::new();
        mock.queue_tool_call("t", json!({}));
        mock.queue_tool_call("t", json!({}));
        let a = mock.chat("", &[], &[]).await.unwrap();
        let b = mock.chat("", &[], &[]).await.unwrap();
        assert_ne!(a.tool_calls[0].id, b.tool_calls[0].id);
    }
}
