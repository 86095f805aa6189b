use std::sync::Arc;
use tracing::debug;

use crate::providers::{
    AssistantTurn, ConversationMessage, Provider, ProviderError, ToolCall, ToolResult,
};
use crate::tools::ToolRegistry;
use crate::util::CancelToken;

/// Name of the system-prompt file looked up in the working directory.
pub const SYSTEM_PROMPT_FILE: &str = "BRUTUS.md";

/// Fallback when no `BRUTUS.md` is present.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are BRUTUS, a coding agent running in a terminal. \
You help with software engineering tasks by reading files, searching code, running shell \
commands, and editing files through the tools available to you. Be concise. When a task \
needs information you do not have, use a tool rather than guessing.";

/// Caps the number of provider calls in one run.
enum TurnBudget {
    Unlimited,
    Limited(usize),
}

impl TurnBudget {
    fn take(&mut self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(0) => false,
            Self::Limited(n) => {
                *n -= 1;
                true
            }
        }
    }
}

/// One conversation driven to completion against one provider.
///
/// The agent owns its conversation exclusively; the only cross-agent
/// coupling is whatever the registered tools provide.
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    verbose: bool,
    conversation: Vec<ConversationMessage>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        verbose: bool,
    ) -> Self {
        Self {
            provider,
            registry,
            system_prompt: system_prompt.into(),
            verbose,
            conversation: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &[ConversationMessage] {
        &self.conversation
    }

    /// Text of the most recent assistant message, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.conversation.iter().rev().find_map(|m| match m {
            ConversationMessage::Assistant(turn) => Some(turn.text.as_str()),
            _ => None,
        })
    }

    /// Every tool call the model has requested so far, in order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.conversation
            .iter()
            .filter_map(|m| match m {
                ConversationMessage::Assistant(turn) => Some(turn.tool_calls.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Interactive loop: read lines until end-of-input or an explicit quit.
    /// Empty lines do not advance the conversation. A provider error is
    /// fatal to the run; tool failures are fed back to the model.
    pub async fn run_interactive(
        &mut self,
        mut input: impl FnMut() -> Option<String> + Send,
        cancel: &CancelToken,
    ) -> Result<(), ProviderError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let Some(line) = input() else {
                return Ok(());
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "quit" || line == "exit" {
                return Ok(());
            }

            self.conversation.push(ConversationMessage::user(line));
            let turn = self.drive(&mut TurnBudget::Unlimited, cancel).await?;
            if let Some(turn) = turn {
                if !turn.text.is_empty() {
                    println!("{}", turn.text);
                }
            }
        }
    }

    /// Bounded single-task run: queue `task` as the user message and drive
    /// the loop for at most `max_turns` provider calls. Exceeding the cap is
    /// not an error; the last assistant text becomes the final message.
    pub async fn run_task(
        &mut self,
        task: &str,
        max_turns: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<String, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.conversation.push(ConversationMessage::user(task));
        let mut budget = match max_turns {
            Some(n) => TurnBudget::Limited(n),
            None => TurnBudget::Unlimited,
        };
        let turn = self.drive(&mut budget, cancel).await?;
        Ok(turn.map(|t| t.text).unwrap_or_default())
    }

    /// Alternate model turns and tool turns until the assistant stops
    /// requesting tools or the budget runs out. Returns the last assistant
    /// turn seen (`None` only when the budget was already empty).
    async fn drive(
        &mut self,
        budget: &mut TurnBudget,
        cancel: &CancelToken,
    ) -> Result<Option<AssistantTurn>, ProviderError> {
        let mut last = None;
        while budget.take() {
            let turn = self.chat_once(cancel).await?;
            let calls = turn.tool_calls.clone();
            last = Some(turn);
            if calls.is_empty() {
                break;
            }

            let results = self.dispatch_tool_calls(&calls).await;
            self.conversation
                .push(ConversationMessage::tool_results(results));

            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
        }
        Ok(last)
    }

    /// One provider call, raced against cancellation, appended to the
    /// conversation on success.
    async fn chat_once(&mut self, cancel: &CancelToken) -> Result<AssistantTurn, ProviderError> {
        let specs = self.registry.specs();
        let turn = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = self
                .provider
                .chat(&self.system_prompt, &self.conversation, &specs) => result?,
        };
        if self.verbose {
            debug!(
                text_len = turn.text.len(),
                tool_calls = turn.tool_calls.len(),
                "assistant turn"
            );
        }
        self.conversation
            .push(ConversationMessage::assistant(turn.clone()));
        Ok(turn)
    }

    /// Execute every requested tool in order. Unknown names and tool
    /// failures become `is_error` results; neither stops the loop.
    async fn dispatch_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            debug!(tool = %call.name, id = %call.id, "dispatching tool call");
            let result = match self.registry.get(&call.name) {
                None => ToolResult::error(&call.id, format!("tool '{}' not found", call.name)),
                Some(tool) => match tool.execute(call.input.clone()).await {
                    Ok(outcome) if outcome.success => ToolResult::ok(&call.id, outcome.output),
                    Ok(outcome) => ToolResult::error(
                        &call.id,
                        outcome.error.unwrap_or_else(|| outcome.output.clone()),
                    ),
                    Err(e) => ToolResult::error(&call.id, e.to_string()),
                },
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::tools::{Tool, ToolOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for OkTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome::ok("ok"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
            anyhow::bail!("disk on fire")
        }
    }

    fn registry_with_stub() -> (Arc<ToolRegistry>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(OkTool {
            calls: calls.clone(),
        }));
        registry.register(Arc::new(FailingTool));
        (Arc::new(registry), calls)
    }

    fn agent_with(mock: MockProvider) -> (Agent, Arc<AtomicUsize>) {
        let (registry, calls) = registry_with_stub();
        let agent = Agent::new(Arc::new(mock), registry, "test system prompt", false);
        (agent, calls)
    }

    #[tokio::test]
    async fn text_only_turn() {
        let mock = MockProvider::new();
        mock.queue_text("Hello");
        let (mut agent, _) = agent_with(mock);

        let reply = agent
            .run_task("hi", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
        assert_eq!(agent.last_assistant_text(), Some("Hello"));
        assert!(agent.tool_calls().is_empty());

        let conv = agent.conversation();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv[0].role(), "user");
        assert_eq!(conv[1].role(), "assistant");
    }

    #[tokio::test]
    async fn single_tool_call_then_text() {
        let mock = MockProvider::new();
        mock.queue_tool_call("read_file", json!({"path": "main.go"}));
        mock.queue_text("I read the file.");
        let (mut agent, calls) = agent_with(mock);

        let reply = agent
            .run_task("read it", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "I read the file.");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let conv = agent.conversation();
        // user, assistant-with-tool_call, tool results, assistant-text
        assert_eq!(conv.len(), 4);
        let ConversationMessage::Assistant(turn) = &conv[1] else {
            panic!("expected assistant turn");
        };
        assert_eq!(turn.tool_calls.len(), 1);
        let ConversationMessage::ToolResults { results } = &conv[2] else {
            panic!("expected tool results");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, turn.tool_calls[0].id);
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "ok");
    }

    #[tokio::test]
    async fn two_sequential_tool_calls() {
        let mock = MockProvider::new();
        mock.queue_tool_call("read_file", json!({"path": "a"}));
        mock.queue_tool_call("read_file", json!({"path": "b"}));
        mock.queue_text("done");
        let (mut agent, calls) = agent_with(mock);

        let reply = agent
            .run_task("read both", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(agent.tool_calls().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_and_continues() {
        let mock = MockProvider::new();
        mock.queue_tool_call("no_such_tool", json!({}));
        mock.queue_text("sorry");
        let (mut agent, _) = agent_with(mock);

        let reply = agent
            .run_task("try it", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "sorry");

        let ConversationMessage::ToolResults { results } = &agent.conversation()[2] else {
            panic!("expected tool results");
        };
        assert!(results[0].is_error);
        assert!(results[0].content.contains("no_such_tool"));
    }

    #[tokio::test]
    async fn failing_tool_is_error_result_not_fatal() {
        let mock = MockProvider::new();
        mock.queue_tool_call("flaky", json!({}));
        mock.queue_text("recovered");
        let (mut agent, _) = agent_with(mock);

        let reply = agent
            .run_task("go", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "recovered");

        let ConversationMessage::ToolResults { results } = &agent.conversation()[2] else {
            panic!("expected tool results");
        };
        assert!(results[0].is_error);
        assert!(results[0].content.contains("disk on fire"));
    }

    #[tokio::test]
    async fn tool_result_ids_pair_with_calls_in_order() {
        let mock = MockProvider::new();
        mock.queue_tool_call("read_file", json!({"path": "x"}));
        mock.queue_text("end");
        let (mut agent, _) = agent_with(mock);
        agent
            .run_task("go", None, &CancelToken::new())
            .await
            .unwrap();

        let conv = agent.conversation();
        for (i, msg) in conv.iter().enumerate() {
            if let ConversationMessage::Assistant(turn) = msg {
                if !turn.tool_calls.is_empty() {
                    let ConversationMessage::ToolResults { results } = &conv[i + 1] else {
                        panic!("assistant tool calls must be followed by results");
                    };
                    assert_eq!(results.len(), turn.tool_calls.len());
                    for (call, result) in turn.tool_calls.iter().zip(results) {
                        assert_eq!(call.id, result.id);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn max_turns_zero_terminates_immediately() {
        let mock = MockProvider::new();
        mock.queue_text("never seen");
        let (mut agent, _) = agent_with(mock);

        let reply = agent
            .run_task("hi", Some(0), &CancelToken::new())
            .await
            .unwrap();
        assert!(reply.is_empty());
        assert!(agent.last_assistant_text().is_none());
    }

    #[tokio::test]
    async fn max_turns_caps_tool_loop() {
        // The model keeps asking for tools; the budget cuts it off and the
        // run still succeeds with the last assistant text (empty here).
        let mock = MockProvider::new();
        mock.queue_tool_call("read_file", json!({}));
        mock.queue_tool_call("read_file", json!({}));
        mock.queue_tool_call("read_file", json!({}));
        let (mut agent, calls) = agent_with(mock);

        let reply = agent
            .run_task("loop", Some(2), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_run() {
        let mock = MockProvider::new();
        mock.queue_text("unreachable");
        let (mut agent, _) = agent_with(mock);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = agent.run_task("hi", None, &cancel).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
    }

    #[tokio::test]
    async fn interactive_quits_on_command_and_skips_blank_lines() {
        let mock = MockProvider::new();
        mock.queue_text("Hello");
        let (mut agent, _) = agent_with(mock);

        let mut lines = vec!["", "  ", "hi", "quit"].into_iter();
        agent
            .run_interactive(
                move || lines.next().map(str::to_string),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // Blank lines never reached the conversation.
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(agent.last_assistant_text(), Some("Hello"));
    }

    #[tokio::test]
    async fn interactive_ends_cleanly_on_eof() {
        let mock = MockProvider::new();
        let (mut agent, _) = agent_with(mock);
        agent
            .run_interactive(|| None, &CancelToken::new())
            .await
            .unwrap();
        assert!(agent.conversation().is_empty());
    }

    #[tokio::test]
    async fn empty_assistant_turn_ends_exchange() {
        // Exhausted mock queue returns an empty turn: displayed as nothing,
        // control returns to input.
        let mock = MockProvider::new();
        let (mut agent, _) = agent_with(mock);
        let reply = agent
            .run_task("hi", None, &CancelToken::new())
            .await
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(agent.conversation().len(), 2);
    }
}
