use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;

use super::traits::{Tool, ToolOutcome};

const MAX_BYTES: u64 = 1_000_000;

/// Read a text file relative to the working directory.
pub struct ReadFileTool {
    workdir: PathBuf,
}

impl ReadFileTool {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents as text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the working directory"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' parameter"))?;

        let full = self.workdir.join(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.len() > MAX_BYTES => {
                return Ok(ToolOutcome::fail(format!(
                    "File too large ({} bytes, limit {MAX_BYTES})",
                    meta.len()
                )));
            }
            Ok(_) => {}
            Err(e) => return Ok(ToolOutcome::fail(format!("Cannot stat {path}: {e}"))),
        }

        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(ToolOutcome::ok(content)),
            Err(e) => Ok(ToolOutcome::fail(format!("Cannot read {path}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("hello.txt"), "hi there")
            .await
            .unwrap();

        let tool = ReadFileTool::new(dir.path());
        let outcome = tool.execute(json!({"path": "hello.txt"})).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "hi there");
    }

    #[tokio::test]
    async fn missing_file_fails_softly() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(dir.path());
        let outcome = tool.execute(json!({"path": "nope.txt"})).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("nope.txt"));
    }

    #[tokio::test]
    async fn missing_path_parameter_is_hard_error() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(dir.path());
        assert!(tool.execute(json!({})).await.is_err());
    }
}
