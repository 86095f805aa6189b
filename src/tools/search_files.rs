use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write;
use std::path::PathBuf;

use super::traits::{Tool, ToolOutcome};

const MAX_MATCHES: usize = 100;

/// Regex search across files under the working directory.
pub struct SearchFilesTool {
    workdir: PathBuf,
}

impl SearchFilesTool {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern across files in the working directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search in (default: entire working directory)"
                },
                "glob": {
                    "type": "string",
                    "description": "File glob filter, e.g. '*.rs' or '*.py'"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutcome> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing 'pattern' parameter"))?;

        let subdir = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let glob_filter = args.get("glob").and_then(|v| v.as_str());

        let re = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::fail(format!("Invalid regex: {e}"))),
        };

        let search_dir = self.workdir.join(subdir);
        if !search_dir.is_dir() {
            return Ok(ToolOutcome::fail(format!("Not a directory: {subdir}")));
        }

        let glob_pat = glob_filter.and_then(|g| glob::Pattern::new(g).ok());

        let mut results = String::new();
        let mut match_count: usize = 0;
        search_recursive(
            &search_dir,
            &search_dir,
            &re,
            &glob_pat,
            &mut results,
            &mut match_count,
        )
        .await;

        if match_count == 0 {
            return Ok(ToolOutcome::ok("No matches found."));
        }

        let truncated = if match_count >= MAX_MATCHES {
            format!("\n... truncated at {MAX_MATCHES} matches")
        } else {
            String::new()
        };
        Ok(ToolOutcome::ok(format!(
            "{match_count} matches:{truncated}\n{results}"
        )))
    }
}

async fn search_recursive(
    root: &std::path::Path,
    dir: &std::path::Path,
    re: &regex::Regex,
    glob_pat: &Option<glob::Pattern>,
    results: &mut String,
    match_count: &mut usize,
) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        if *match_count >= MAX_MATCHES {
            return;
        }

        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files/dirs and common non-text dirs
        if name.starts_with('.') || name == "target" || name == "node_modules" {
            continue;
        }

        if let Ok(ft) = entry.file_type().await {
            if ft.is_dir() {
                Box::pin(search_recursive(root, &path, re, glob_pat, results, match_count)).await;
            } else if ft.is_file() {
                if let Some(ref pat) = glob_pat {
                    if !pat.matches(&name) {
                        continue;
                    }
                }

                // Skip binary/large files
                if let Ok(meta) = entry.metadata().await {
                    if meta.len() > 1_000_000 {
                        continue;
                    }
                }

                if let Ok(content) = tokio::fs::read_to_string(&path).await {
                    let rel = path.strip_prefix(root).unwrap_or(&path);
                    for (line_num, line) in content.lines().enumerate() {
                        if *match_count >= MAX_MATCHES {
                            return;
                        }
                        if re.is_match(line) {
                            let _ = writeln!(results, "{}:{}: {}", rel.display(), line_num + 1, line);
                            *match_count += 1;
                        }
                    }
                }
            }
        }
    }
}
