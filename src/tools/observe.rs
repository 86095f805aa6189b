use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;

use super::traits::{Tool, ToolOutcome};
use crate::bus::MessageBus;

/// Read messages from the inter-agent channel, optionally past a watermark.
pub struct ObserveTool {
    bus: Arc<MessageBus>,
}

impl ObserveTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Tool for ObserveTool {
    fn name(&self) -> &str {
        "observe"
    }

    fn description(&self) -> &str {
        "Read broadcast messages from other agents, newest last"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "since": {
                    "type": "integer",
                    "description": "Only return messages with a sequence number greater than this"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let since = args.get("since").and_then(serde_json::Value::as_u64);
        let messages = self.bus.observe(since);

        if messages.is_empty() {
            return Ok(ToolOutcome::ok("No new messages."));
        }

        let mut output = String::new();
        for msg in &messages {
            let _ = writeln!(
                output,
                "#{} [{}] {}: {}",
                msg.seq,
                msg.timestamp.format("%H:%M:%S%.3f"),
                msg.from,
                msg.text
            );
        }
        Ok(ToolOutcome::ok(output))
    }
}
