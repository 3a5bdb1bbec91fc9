// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tracing::debug;

use sema_model::ToolUseBlock;
use sema_runtime::{DiffKind, PermissionContent};

use crate::builtin::{check_freshness, mtime_ms};
use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem, overwriting any existing content. \
         ALWAYS prefer editing existing files with edit_file. \
         An existing file must be read with read_file before it can be overwritten. \
         Creates parent directories automatically. \
         NEVER proactively create documentation or README files unless explicitly requested."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
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
            Some(p) => format!("Write {p}"),
            None => "Write file".to_string(),
        }
    }

    async fn validate_input(&self, input: &Value, ctx: &ToolContext) -> Result<(), String> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'path'")?;
        check_freshness(ctx, &ctx.resolve_path(path))
    }

    async fn permission_content(&self, input: &Value, ctx: &ToolContext) -> PermissionContent {
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let new = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let resolved = ctx.resolve_path(path);
        let old = tokio::fs::read_to_string(&resolved).await.unwrap_or_default();
        let kind = if resolved.exists() {
            DiffKind::Diff
        } else {
            DiffKind::New
        };
        let diff_text = TextDiff::from_lines(old.as_str(), new)
            .unified_diff()
            .header(path, path)
            .to_string();
        PermissionContent::FileDiff {
            kind,
            path: path.to_string(),
            patch: new.to_string(),
            diff_text,
        }
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let path = match call.input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err("missing required parameter 'path'"),
        };
        let content = match call.input.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err("missing required parameter 'content'"),
        };

        debug!(path = %path, bytes = content.len(), "write_file tool");

        let resolved = ctx.resolve_path(&path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutput::err(format!("mkdir error: {e}"));
                }
            }
        }
        if let Err(e) = tokio::fs::write(&resolved, &content).await {
            return ToolOutput::err(format!("write error: {e}"));
        }

        // The agent's own write refreshes the freshness baseline.
        if let Some(ts) = mtime_ms(&resolved) {
            ctx.registry
                .set_read_timestamp(&ctx.agent_id, resolved.clone(), ts);
        }

        ToolOutput::ok(format!("wrote {} bytes to {path}", content.len()))
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
            id: "w1".into(),
            name: "write_file".into(),
            input: args,
        }
    }

    #[tokio::test]
    async fn writes_new_file_without_prior_read() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("new.txt");
        let input = json!({"path": path.to_str().unwrap(), "content": "hello"});
        assert!(WriteFileTool.validate_input(&input, &ctx).await.is_ok());
        let out = WriteFileTool.run(&call(input), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn rejects_overwrite_of_unread_file() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "original").unwrap();
        let input = json!({"path": path.to_str().unwrap(), "content": "x"});
        let err = WriteFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("has not been read"));
    }

    #[tokio::test]
    async fn rejects_stale_write_after_external_modification() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1").unwrap();
        // Agent read at t=100; the file changed on disk at a later mtime.
        ctx.registry.set_read_timestamp(&ctx.agent_id, path.clone(), 100);
        let input = json!({"path": path.to_str().unwrap(), "content": "v2"});
        let err = WriteFileTool.validate_input(&input, &ctx).await.unwrap_err();
        assert!(err.contains("modified since read"), "{err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
    }

    #[tokio::test]
    async fn accepts_write_after_fresh_read() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1").unwrap();
        let ts = crate::builtin::mtime_ms(&path).unwrap();
        ctx.registry
            .set_read_timestamp(&ctx.agent_id, path.clone(), ts);
        let input = json!({"path": path.to_str().unwrap(), "content": "v2"});
        assert!(WriteFileTool.validate_input(&input, &ctx).await.is_ok());
        let out = WriteFileTool.run(&call(input), &ctx).await;
        assert!(!out.is_error);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v2");
    }

    #[tokio::test]
    async fn permission_content_is_new_diff_for_new_file() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("new.txt");
        let input = json!({"path": path.to_str().unwrap(), "content": "abc\n"});
        match WriteFileTool.permission_content(&input, &ctx).await {
            PermissionContent::FileDiff { kind, diff_text, .. } => {
                assert_eq!(kind, DiffKind::New);
                assert!(diff_text.contains("+abc"));
            }
            other => panic!("expected FileDiff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let (dir, ctx) = testutil::ctx();
        let path = dir.path().join("a/b/c.txt");
        let out = WriteFileTool
            .run(
                &call(json!({"path": path.to_str().unwrap(), "content": "deep"})),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(path.exists());
    }
}
