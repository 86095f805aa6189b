use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::traits::{Tool, ToolOutcome};
use crate::bus::MessageBus;

/// Post a message onto the inter-agent channel.
pub struct BroadcastTool {
    bus: Arc<MessageBus>,
}

impl BroadcastTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for BroadcastTool {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn description(&self) -> &str {
        "Broadcast a message to all other agents on the shared channel"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "from": {
                    "type": "string",
                    "description": "Your agent id"
                },
                "message": {
                    "type": "string",
                    "description": "Message text to broadcast"
                }
            },
            "required": ["from", "message"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let from = args
            .get("from")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'from' parameter"))?;
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'message' parameter"))?;

        let seq = self.bus.broadcast(from, message);
        Ok(ToolOutcome::ok(format!("Broadcast #{seq} sent")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_appends_to_journal() {
        let bus = Arc::new(MessageBus::new());
        let tool = BroadcastTool::new(bus.clone());

        let outcome = tool
            .execute(json!({"from": "agent-a", "message": "status: done"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("#1"));

        let journal = bus.observe(None);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].from, "agent-a");
        assert_eq!(journal[0].text, "status: done");
    }

    #[tokio::test]
    async fn missing_fields_are_hard_errors() {
        let tool = BroadcastTool::new(Arc::new(MessageBus::new()));
        assert!(tool.execute(json!({"from": "a"})).await.is_err());
        assert!(tool.execute(json!({"message": "m"})).await.is_err());
    }
}
