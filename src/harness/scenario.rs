use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use super::{AgentConfig, AgentJob, AgentResult, Harness};
use crate::providers::{MockProvider, MockResponse};
use crate::util::CancelToken;

/// A declarative multi-agent test case: agents with scripted mock
/// responses, plus assertions over the collected results.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<ScenarioAgent>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioAgent {
    pub id: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub user_messages: Vec<String>,
    #[serde(default)]
    pub mock_responses: Vec<MockResponseSpec>,
}

/// Either `{"content": "..."}` or `{"tool_call": "...", "input": {...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MockResponseSpec {
    Text {
        content: String,
    },
    Tool {
        tool_call: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assertion {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    ToolCalled,
    Contains,
    Success,
}

/// Parse a scenario file (JSON).
pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read scenario file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid scenario file {}", path.display()))
}

/// Scripted provider for one scenario agent.
pub fn mock_provider_for(agent: &ScenarioAgent) -> MockProvider {
    MockProvider::with_responses(
        agent
            .mock_responses
            .iter()
            .map(|spec| match spec {
                MockResponseSpec::Text { content } => MockResponse::Text(content.clone()),
                MockResponseSpec::Tool { tool_call, input } => MockResponse::ToolCall {
                    name: tool_call.clone(),
                    input: input.clone(),
                },
            })
            .collect(),
    )
}

/// Run every scenario agent against its own scripted mock.
pub async fn run_scenario(
    harness: &Harness,
    scenario: &Scenario,
    concurrent: bool,
) -> Vec<AgentResult> {
    let jobs: Vec<AgentJob> = scenario
        .agents
        .iter()
        .map(|agent| AgentJob {
            config: AgentConfig {
                id: agent.id.clone(),
                system_prompt: agent.system_prompt.clone(),
                tasks: agent.user_messages.clone(),
                workdir: None,
            },
            provider: Arc::new(mock_provider_for(agent)),
        })
        .collect();

    let cancel = CancelToken::new();
    if concurrent {
        harness.run_concurrent(jobs, &cancel).await
    } else {
        harness.run_sequential(jobs, &cancel).await
    }
}

/// Compare results against the scenario's assertions; one human-readable
/// line per failed assertion, empty when everything held.
pub fn validate_assertions(results: &[AgentResult], assertions: &[Assertion]) -> Vec<String> {
    let mut failures = Vec::new();
    for assertion in assertions {
        let Some(result) = results.iter().find(|r| r.agent_id == assertion.agent_id) else {
            failures.push(format!(
                "assertion references unknown agent '{}'",
                assertion.agent_id
            ));
            continue;
        };
        match assertion.kind {
            AssertionKind::ToolCalled => {
                if !result.tool_was_called(&assertion.value) {
                    failures.push(format!(
                        "agent '{}' never called tool '{}'",
                        assertion.agent_id, assertion.value
                    ));
                }
            }
            AssertionKind::Contains => {
                let found = result.final_message.contains(&assertion.value)
                    || result.conversation.iter().any(|m| match m {
                        crate::providers::ConversationMessage::Assistant(turn) => {
                            turn.text.contains(&assertion.value)
                        }
                        _ => false,
                    });
                if !found {
                    failures.push(format!(
                        "agent '{}' output never contained '{}'",
                        assertion.agent_id, assertion.value
                    ));
                }
            }
            AssertionKind::Success => {
                let expected = assertion.value.is_empty() || assertion.value == "true";
                if result.success != expected {
                    failures.push(format!(
                        "agent '{}' success was {}, expected {}",
                        assertion.agent_id, result.success, expected
                    ));
                }
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::tools;

    const SAMPLE: &str = r#"{
        "name": "pair",
        "description": "two agents, one with a tool call",
        "agents": [
            {
                "id": "caller",
                "system_prompt": "You call tools.",
                "user_messages": ["run something"],
                "mock_responses": [
                    {"tool_call": "shell", "input": {"command": "true"}},
                    {"content": "A finished"}
                ]
            },
            {
                "id": "talker",
                "user_messages": ["say hi"],
                "mock_responses": [
                    {"content": "B finished"}
                ]
            }
        ],
        "assertions": [
            {"agent_id": "caller", "type": "tool_called", "value": "shell"},
            {"agent_id": "caller", "type": "contains", "value": "A finished"},
            {"agent_id": "talker", "type": "success"}
        ]
    }"#;

    fn harness() -> Harness {
        let bus = Arc::new(MessageBus::new());
        let registry = Arc::new(tools::default_registry(Path::new("."), bus.clone()));
        Harness::new(registry, bus, 3, false)
    }

    #[test]
    fn parses_scenario_json() {
        let scenario: Scenario = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(scenario.name, "pair");
        assert_eq!(scenario.agents.len(), 2);
        assert!(matches!(
            scenario.agents[0].mock_responses[0],
            MockResponseSpec::Tool { .. }
        ));
        assert!(matches!(
            scenario.agents[0].mock_responses[1],
            MockResponseSpec::Text { .. }
        ));
        assert_eq!(scenario.assertions.len(), 3);
        assert_eq!(scenario.assertions[0].kind, AssertionKind::ToolCalled);
    }

    #[tokio::test]
    async fn scenario_runs_concurrently_and_assertions_hold() {
        let scenario: Scenario = serde_json::from_str(SAMPLE).unwrap();
        let results = run_scenario(&harness(), &scenario, true).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        let failures = validate_assertions(&results, &scenario.assertions);
        assert!(failures.is_empty(), "unexpected failures: {failures:?}");

        let caller = results.iter().find(|r| r.agent_id == "caller").unwrap();
        assert_eq!(caller.final_message, "A finished");
        let talker = results.iter().find(|r| r.agent_id == "talker").unwrap();
        assert_eq!(talker.final_message, "B finished");
    }

    #[tokio::test]
    async fn scenario_runs_sequentially_too() {
        let scenario: Scenario = serde_json::from_str(SAMPLE).unwrap();
        let results = run_scenario(&harness(), &scenario, false).await;
        assert_eq!(results[0].agent_id, "caller");
        assert_eq!(results[1].agent_id, "talker");
    }

    #[tokio::test]
    async fn failed_assertions_are_reported() {
        let scenario: Scenario = serde_json::from_str(SAMPLE).unwrap();
        let results = run_scenario(&harness(), &scenario, false).await;

        let bad = vec![
            Assertion {
                agent_id: "caller".into(),
                kind: AssertionKind::ToolCalled,
                value: "web_fetch".into(),
            },
            Assertion {
                agent_id: "ghost".into(),
                kind: AssertionKind::Success,
                value: String::new(),
            },
        ];
        let failures = validate_assertions(&results, &bad);
        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("web_fetch"));
        assert!(failures[1].contains("ghost"));
    }
}
