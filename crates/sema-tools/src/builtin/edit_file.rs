// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tracing::debug;

use sema_model::ToolUseBlock;
use sema_runtime::{DiffKind, PermissionContent};

use crate::builtin::{check_freshness, mtime_ms};
use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

pub struct EditFileTool;

impl EditFileTool {
    fn params(input: &Value) -> Result<(String, String, String, bool), String> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'path'")?
            .to_string();
        let old_string = input
            .get("old_string")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'old_string'")?
            .to_string();
        let new_string = input
            .get("new_string")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'new_string'")?
            .to_string();
        let replace_all = input
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok((path, old_string, new_string, replace_all))
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Performs an exact string replacement in a file.\n\
         The file must have been read with read_file first; strip the L{n}: prefix\n\
         from read_file output before using it as old_string.\n\
         old_string must match the file contents exactly, including whitespace, and\n\
         must be unique in the file — extend it with surrounding context until it is.\n\
         Set replace_all=true to replace every occurrence instead."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text (must differ from old_string)"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn permission_kind(&self) -> Option<PermissionKind> {
        Some(PermissionKind::FileEdit)
    }

    fn mutated_path(&self, input: &Value) -> Option<PathBuf> {
        input.get("path").and_then(|v| v.as_str()).map(PathBuf::from)
    }

    fn permission_title(&self, input: &Value) -> String {
        match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => format!("Edit {p}"),
            None => "Edit file".to_string(),
        }
    }

    async fn validate_input(&self, input: &Value, ctx: &ToolContext) -> Result<(), String> {
        let (path, old_string, new_string, replace_all) = Self::params(input)?;
        if old_string.is_empty() {
            return Err("old_string must not be empty".to_string());
        }
        if old_string == new_string {
            return Err("old_string and new_string are identical".to_string());
        }
        let resolved = ctx.resolve_path(&path);
        if !resolved.exists() {
            return Err(format!("file does not exist: {}", resolved.display()));
        }
        check_freshness(ctx, &resolved)?;

        let text = std::fs::read_to_string(&resolved).map_err(|e| format!("read error: {e}"))?;
        let count = text.matches(&old_string).count();
        if count == 0 {
            return Err("old_string not found in file".to_string());
        }
        if count > 1 && !replace_all {
            return Err(format!(
                "old_string appears {count} times; extend it with more context to make it \
                 unique, or set replace_all=true"
            ));
        }
        Ok(())
    }

    async fn permission_content(&self, input: &Value, ctx: &ToolContext) -> PermissionContent {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let resolved = ctx.resolve_path(path);
        let old = tokio::fs::read_to_string(&resolved).await.unwrap_or_default();
        let new = match Self::params(input) {
            Ok((_, old_string, new_string, replace_all)) => {
                if replace_all {
                    old.replace(&old_string, &new_string)
                } else {
                    old.replacen(&old_string, &new_string, 1)
                }
            }
            Err(_) => old.clone(),
        };
        let diff_text = TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(path, path)
            .to_string();
        PermissionContent::FileDiff {
            kind: DiffKind::Diff,
            path: path.to_string(),
            patch: new,
            diff_text,
        }
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let (path, old_string, new_string, replace_all) = match Self::params(&call.input) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e),
        };

        debug!(path = %path, replace_all, "edit_file tool");

        let resolved = ctx.resolve_path(&path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(format!("read error: {e}")),
        };

        let count = text.matches(&old_string).count();
        if count == 0 {
            return ToolOutput::err("old_string not found in file");
        }
        let replaced = if replace_all {
            text.replace(&old_string, &new_string)
        } else {
            text.replacen(&old_string, &new_string, 1)
        };
        if let Err(e) = tokio::fs::write(&resolved, &replaced).await {
            return ToolOutput::err(format!("write error: {e}"));
        }
        if let Some(ts) = mtime_ms(&resolved) {
            ctx.registry
                .set_read_timestamp(&ctx.agent_id, resolved.clone(), ts);
        }

        let n = if replace_all { count } else { 1 };
        ToolOutput::ok(format!("edited {path}: replaced {n} occurrence(s)"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;

    fn call(args: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: "e1".into(),
            name: "edit_file".into(),
            input: args,
        }
    }

    fn freshly_read(ctx: &ToolContext, path: &std::path::Path) {
        let ts = crate::builtin::mtime_ms(path).unwrap();
        ctx.registry
            .set_read_timestamp(&ctx.agent_id, path.to_path_buf(), ts);
    }

    #[tokio::test]
    async fn replaces_unique_occurrence() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "fn old() {}\n").unwrap();
        freshly_read(&ctx, &path);
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "fn old()",
            "new_string": "fn new()"
        });
        assert!(EditFileTool.validate_input(&input, &ctx).await.is_ok());
        let out = EditFileTool.run(&call(input), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fn new() {}\n");
    }

    #[tokio::test]
    async fn ambiguous_match_requires_replace_all() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "x = 1\nx = 1\n").unwrap();
        freshly_read(&ctx, &path);
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "x = 1",
            "new_string": "x = 2"
        });
        let err = EditFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("2 times"));

        let input_all = json!({
            "path": path.to_str().unwrap(),
            "old_string": "x = 1",
            "new_string": "x = 2",
            "replace_all": true
        });
        assert!(EditFileTool.validate_input(&input_all, &ctx).await.is_ok());
        let out = EditFileTool.run(&call(input_all), &ctx).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x = 2\nx = 2\n");
        assert!(out.content.contains("2 occurrence"));
    }

    #[tokio::test]
    async fn stale_file_is_rejected() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1").unwrap();
        ctx.registry.set_read_timestamp(&ctx.agent_id, path.clone(), 1);
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "v1",
            "new_string": "v2"
        });
        let err = EditFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("modified since read"));
    }

    #[tokio::test]
    async fn identical_strings_are_rejected() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "abc").unwrap();
        freshly_read(&ctx, &path);
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "abc",
            "new_string": "abc"
        });
        let err = EditFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("identical"));
    }

    #[tokio::test]
    async fn missing_old_string_is_rejected() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "abc").unwrap();
        freshly_read(&ctx, &path);
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "zzz",
            "new_string": "yyy"
        });
        let err = EditFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn permission_content_shows_unified_diff() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "old line\n").unwrap();
        let input = json!({
            "path": path.to_str().unwrap(),
            "old_string": "old line",
            "new_string": "new line"
        });
        match EditFileTool.permission_content(&input, &ctx).await {
            PermissionContent::FileDiff { diff_text, .. } => {
                assert!(diff_text.contains("-old line"));
                assert!(diff_text.contains("+new line"));
            }
            other => panic!("expected FileDiff, got {other:?}"),
        }
    }
}
