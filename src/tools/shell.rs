use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio::process::Command;

use super::traits::{Tool, ToolOutcome};

const MAX_OUTPUT: usize = 50_000;

/// Run a shell command with the working directory as cwd.
pub struct ShellTool {
    workdir: PathBuf,
}

impl ShellTool {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return combined stdout/stderr"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line passed to sh -c"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' parameter"))?;

        let output = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok(ToolOutcome::fail(format!("Cannot spawn shell: {e}"))),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        if text.len() > MAX_OUTPUT {
            text.truncate(MAX_OUTPUT);
            text.push_str("\n... [truncated]");
        }

        if output.status.success() {
            Ok(ToolOutcome::ok(text))
        } else {
            Ok(ToolOutcome {
                success: false,
                output: text.clone(),
                error: Some(format!(
                    "Command exited with {}: {}",
                    output.status,
                    text.lines().last().unwrap_or("")
                )),
            })
        }
    }
}
