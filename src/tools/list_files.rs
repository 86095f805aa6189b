use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;

use super::traits::{Tool, ToolOutcome};

/// List directory entries relative to the working directory.
pub struct ListFilesTool {
    workdir: PathBuf,
}

impl ListFilesTool {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories at a path (directories get a trailing slash)"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: working directory)"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let rel = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = self.workdir.join(rel);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutcome::fail(format!("Cannot list {rel}: {e}"))),
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            names.push(if is_dir { format!("{name}/") } else { name });
        }
        names.sort();

        if names.is_empty() {
            Ok(ToolOutcome::ok("(empty directory)"))
        } else {
            Ok(ToolOutcome::ok(names.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_sorted_with_dir_markers() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), "").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();

        let tool = ListFilesTool::new(dir.path());
        let outcome = tool.execute(json!({})).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = TempDir::new().unwrap();
        let tool = ListFilesTool::new(dir.path());
        let outcome = tool.execute(json!({})).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("empty"));
    }

    #[tokio::test]
    async fn missing_directory_fails_softly() {
        let dir = TempDir::new().unwrap();
        let tool = ListFilesTool::new(dir.path());
        let outcome = tool.execute(json!({"path": "missing"})).await.unwrap();
        assert!(!outcome.success);
    }
}
