pub mod scenario;

use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::{Agent, DEFAULT_SYSTEM_PROMPT};
use crate::bus::MessageBus;
use crate::providers::{ConversationMessage, Provider, ToolCall};
use crate::tools::{self, ToolRegistry};
use crate::util::CancelToken;

/// Provider-call cap applied to each agent run.
pub const DEFAULT_MAX_TURNS: usize = 10;

/// One agent's setup: identity, system prompt, and the user messages fed in
/// order (the first is the initial task).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Overrides the harness-wide tool working directory for this agent.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

/// An agent paired with the provider it runs against.
pub struct AgentJob {
    pub config: AgentConfig,
    pub provider: Arc<dyn Provider>,
}

/// Immutable record of one finished agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub agent_id: String,
    pub success: bool,
    pub final_message: String,
    pub tool_calls: Vec<ToolCall>,
    pub conversation: Vec<ConversationMessage>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl AgentResult {
    pub fn tool_was_called(&self, name: &str) -> bool {
        self.tool_calls.iter().any(|c| c.name == name)
    }

    pub fn tool_call_count(&self, name: &str) -> usize {
        self.tool_calls.iter().filter(|c| c.name == name).count()
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.conversation.iter().rev().find_map(|m| match m {
            ConversationMessage::Assistant(turn) => Some(turn.text.as_str()),
            _ => None,
        })
    }
}

/// Launches and coordinates independent agents over a shared tool registry
/// and inter-agent bus. Agent failures never cross agent boundaries.
pub struct Harness {
    registry: Arc<ToolRegistry>,
    bus: Arc<MessageBus>,
    max_turns: usize,
    verbose: bool,
}

impl Harness {
    pub fn new(
        registry: Arc<ToolRegistry>,
        bus: Arc<MessageBus>,
        max_turns: usize,
        verbose: bool,
    ) -> Self {
        Self {
            registry,
            bus,
            max_turns,
            verbose,
        }
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    /// Run each agent to completion in order; one result per agent.
    pub async fn run_sequential(
        &self,
        jobs: Vec<AgentJob>,
        cancel: &CancelToken,
    ) -> Vec<AgentResult> {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(self.run_one(job, cancel.clone()).await);
        }
        results
    }

    /// Run all agents in parallel; results are collected as each agent
    /// finishes, so their order is not guaranteed.
    pub async fn run_concurrent(
        &self,
        jobs: Vec<AgentJob>,
        cancel: &CancelToken,
    ) -> Vec<AgentResult> {
        let mut set = JoinSet::new();
        for job in jobs {
            let registry = self.registry.clone();
            let bus = self.bus.clone();
            let max_turns = self.max_turns;
            let verbose = self.verbose;
            let cancel = cancel.clone();
            set.spawn(async move {
                run_agent(registry, bus, max_turns, verbose, job, cancel).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "agent task panicked"),
            }
        }
        results
    }

    async fn run_one(&self, job: AgentJob, cancel: CancelToken) -> AgentResult {
        run_agent(
            self.registry.clone(),
            self.bus.clone(),
            self.max_turns,
            self.verbose,
            job,
            cancel,
        )
        .await
    }

    /// Per-agent status table: SUCCESS/FAILED, duration, first error.
    pub fn print_summary(results: &[AgentResult]) {
        println!();
        println!("{:<20} {:<10} {:>9}  {}", "Agent", "Status", "Duration", "Error");
        for result in results {
            let status = if result.success {
                style("SUCCESS").green()
            } else {
                style("FAILED").red()
            };
            println!(
                "{:<20} {:<10} {:>8.1}s  {}",
                result.agent_id,
                status,
                result.duration.as_secs_f64(),
                result.error.as_deref().unwrap_or("-")
            );
        }
    }
}

async fn run_agent(
    registry: Arc<ToolRegistry>,
    bus: Arc<MessageBus>,
    max_turns: usize,
    verbose: bool,
    job: AgentJob,
    cancel: CancelToken,
) -> AgentResult {
    let started = Instant::now();
    let agent_id = job.config.id.clone();

    // A per-agent working directory gets its own registry; the bus stays
    // shared either way.
    let registry = match &job.config.workdir {
        Some(dir) => Arc::new(tools::default_registry(dir, bus)),
        None => registry,
    };
    let system_prompt = if job.config.system_prompt.is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        job.config.system_prompt.clone()
    };

    let mut agent = Agent::new(job.provider, registry, system_prompt, verbose);
    let mut final_message = String::new();
    let mut error = None;
    let mut remaining = max_turns;

    for task in &job.config.tasks {
        if remaining == 0 {
            break;
        }
        debug!(agent = %agent_id, task = %task, "agent task starting");
        let before = assistant_count(agent.conversation());
        match agent.run_task(task, Some(remaining), &cancel).await {
            Ok(message) => {
                final_message = message;
                let used = assistant_count(agent.conversation()) - before;
                remaining = remaining.saturating_sub(used);
            }
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        }
    }

    AgentResult {
        agent_id,
        success: error.is_none(),
        final_message,
        tool_calls: agent.tool_calls(),
        conversation: agent.conversation().to_vec(),
        error,
        duration: started.elapsed(),
    }
}

fn assistant_count(conversation: &[ConversationMessage]) -> usize {
    conversation
        .iter()
        .filter(|m| matches!(m, ConversationMessage::Assistant(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        AssistantTurn, MockProvider, ProviderError, ToolSpec,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct BrokenProvider;

    #[async_trait]
    impl Provider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }
        fn model(&self) -> String {
            String::new()
        }
        fn set_model(&mut self, _model: &str) {}
        fn models(&self) -> Vec<String> {
            Vec::new()
        }
        async fn chat(
            &self,
            _system_prompt: &str,
            _conversation: &[ConversationMessage],
            _tools: &[ToolSpec],
        ) -> Result<AssistantTurn, ProviderError> {
            Err(ProviderError::BackendUnavailable("wire cut".into()))
        }
    }

    fn harness() -> Harness {
        let bus = Arc::new(MessageBus::new());
        let registry = Arc::new(tools::default_registry(std::path::Path::new("."), bus.clone()));
        Harness::new(registry, bus, 3, false)
    }

    fn text_job(id: &str, reply: &str) -> AgentJob {
        let mock = MockProvider::new();
        mock.queue_text(reply);
        AgentJob {
            config: AgentConfig {
                id: id.into(),
                system_prompt: String::new(),
                tasks: vec!["go".into()],
                workdir: None,
            },
            provider: Arc::new(mock),
        }
    }

    #[tokio::test]
    async fn sequential_returns_one_result_per_agent_in_order() {
        let results = harness()
            .run_sequential(
                vec![text_job("a", "alpha"), text_job("b", "beta")],
                &CancelToken::new(),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_id, "a");
        assert_eq!(results[0].final_message, "alpha");
        assert_eq!(results[1].agent_id, "b");
        assert_eq!(results[1].final_message, "beta");
    }

    #[tokio::test]
    async fn concurrent_runs_collect_all_results() {
        let results = harness()
            .run_concurrent(
                vec![text_job("a", "from A"), text_job("b", "from B")],
                &CancelToken::new(),
            )
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));

        let ids: HashSet<&str> = results.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "b"]));

        for result in &results {
            let expected = if result.agent_id == "a" { "from A" } else { "from B" };
            assert_eq!(result.final_message, expected);
        }
    }

    #[tokio::test]
    async fn agent_failure_is_isolated() {
        let broken = AgentJob {
            config: AgentConfig {
                id: "bad".into(),
                system_prompt: String::new(),
                tasks: vec!["go".into()],
                workdir: None,
            },
            provider: Arc::new(BrokenProvider),
        };
        let results = harness()
            .run_concurrent(vec![broken, text_job("good", "fine")], &CancelToken::new())
            .await;

        let bad = results.iter().find(|r| r.agent_id == "bad").unwrap();
        assert!(!bad.success);
        assert!(bad.error.as_deref().unwrap().contains("wire cut"));

        let good = results.iter().find(|r| r.agent_id == "good").unwrap();
        assert!(good.success);
        assert_eq!(good.final_message, "fine");
    }

    #[tokio::test]
    async fn max_turns_shared_across_tasks() {
        // Three queued replies but a harness cap of 3 provider calls across
        // both tasks: the second task gets the remaining budget.
        let mock = MockProvider::new();
        mock.queue_tool_call("shell", serde_json::json!({"command": "true"}));
        mock.queue_text("first done");
        mock.queue_text("second done");
        let job = AgentJob {
            config: AgentConfig {
                id: "a".into(),
                system_prompt: String::new(),
                tasks: vec!["one".into(), "two".into()],
                workdir: None,
            },
            provider: Arc::new(mock),
        };
        let results = harness().run_sequential(vec![job], &CancelToken::new()).await;
        assert!(results[0].success);
        assert_eq!(results[0].final_message, "second done");
        assert_eq!(assistant_count(&results[0].conversation), 3);
    }

    #[tokio::test]
    async fn result_helpers_reflect_tool_activity() {
        let mock = MockProvider::new();
        mock.queue_tool_call("shell", serde_json::json!({"command": "echo hi"}));
        mock.queue_text("ran it");
        let job = AgentJob {
            config: AgentConfig {
                id: "a".into(),
                system_prompt: String::new(),
                tasks: vec!["run".into()],
                workdir: None,
            },
            provider: Arc::new(mock),
        };
        let results = harness().run_sequential(vec![job], &CancelToken::new()).await;
        let result = &results[0];
        assert!(result.tool_was_called("shell"));
        assert_eq!(result.tool_call_count("shell"), 1);
        assert!(!result.tool_was_called("read_file"));
        assert_eq!(result.last_assistant_message(), Some("ran it"));
        assert!(result.duration >= Duration::ZERO);
    }
}
