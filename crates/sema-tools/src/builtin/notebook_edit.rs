// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;

use crate::builtin::{check_freshness, mtime_ms};
use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

/// Edits one cell of a Jupyter notebook (`.ipynb` JSON document).
pub struct NotebookEditTool;

impl NotebookEditTool {
    fn params(input: &Value) -> Result<(String, usize, String), String> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'path'")?
            .to_string();
        let cell_index = input
            .get("cell_index")
            .and_then(|v| v.as_u64())
            .ok_or("missing required parameter 'cell_index'")? as usize;
        let mode = input
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("replace")
            .to_string();
        Ok((path, cell_index, mode))
    }
}

#[async_trait]
impl Tool for NotebookEditTool {
    fn name(&self) -> &str {
        "notebook_edit"
    }

    fn description(&self) -> &str {
        "Replace, insert, or delete one cell of a Jupyter notebook (.ipynb).\n\
         mode=replace (default) rewrites the cell source at cell_index;\n\
         mode=insert adds a new cell at cell_index; mode=delete removes it.\n\
         The notebook must have been read with read_file first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the .ipynb file"
                },
                "cell_index": {
                    "type": "integer",
                    "description": "0-indexed cell position"
                },
                "mode": {
                    "type": "string",
                    "enum": ["replace", "insert", "delete"],
                    "description": "Edit mode (default replace)"
                },
                "source": {
                    "type": "string",
                    "description": "New cell source (required for replace and insert)"
                },
                "cell_type": {
                    "type": "string",
                    "enum": ["code", "markdown"],
                    "description": "Cell type for inserted cells (default code)"
                }
            },
            "required": ["path", "cell_index"]
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
            Some(p) => format!("Edit notebook {p}"),
            None => "Edit notebook".to_string(),
        }
    }

    async fn validate_input(&self, input: &Value, ctx: &ToolContext) -> Result<(), String> {
        let (path, _, mode) = Self::params(input)?;
        if !path.ends_with(".ipynb") {
            return Err(format!("not a notebook file: {path}"));
        }
        if mode != "delete" && input.get("source").and_then(|v| v.as_str()).is_none() {
            return Err(format!("mode '{mode}' requires 'source'"));
        }
        let resolved = ctx.resolve_path(&path);
        if !resolved.exists() {
            return Err(format!("file does not exist: {}", resolved.display()));
        }
        check_freshness(ctx, &resolved)
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let (path, cell_index, mode) = match Self::params(&call.input) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(e),
        };
        let source = call
            .input
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let cell_type = call
            .input
            .get("cell_type")
            .and_then(|v| v.as_str())
            .unwrap_or("code")
            .to_string();

        debug!(path = %path, cell_index, mode = %mode, "notebook_edit tool");

        let resolved = ctx.resolve_path(&path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(format!("read error: {e}")),
        };
        let mut notebook: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => return ToolOutput::err(format!("invalid notebook JSON: {e}")),
        };
        let Some(cells) = notebook.get_mut("cells").and_then(|c| c.as_array_mut()) else {
            return ToolOutput::err("notebook has no 'cells' array");
        };

        let summary = match mode.as_str() {
            "replace" => {
                let Some(cell) = cells.get_mut(cell_index) else {
                    return ToolOutput::err(format!(
                        "cell_index {cell_index} out of range (notebook has {} cells)",
                        cells.len()
                    ));
                };
                cell["source"] = Value::String(source);
                format!("replaced cell {cell_index} of {path}")
            }
            "insert" => {
                if cell_index > cells.len() {
                    return ToolOutput::err(format!(
                        "cell_index {cell_index} out of range for insert (notebook has {} cells)",
                        cells.len()
                    ));
                }
                let cell = json!({
                    "cell_type": cell_type,
                    "metadata": {},
                    "source": source,
                    "outputs": [],
                    "execution_count": null
                });
                cells.insert(cell_index, cell);
                format!("inserted cell at {cell_index} of {path}")
            }
            "delete" => {
                if cell_index >= cells.len() {
                    return ToolOutput::err(format!(
                        "cell_index {cell_index} out of range (notebook has {} cells)",
                        cells.len()
                    ));
                }
                cells.remove(cell_index);
                format!("deleted cell {cell_index} of {path}")
            }
            other => return ToolOutput::err(format!("unknown mode: {other}")),
        };

        let serialized = match serde_json::to_string_pretty(&notebook) {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(format!("serialize error: {e}")),
        };
        if let Err(e) = tokio::fs::write(&resolved, serialized).await {
            return ToolOutput::err(format!("write error: {e}"));
        }
        if let Some(ts) = mtime_ms(&resolved) {
            ctx.registry
                .set_read_timestamp(&ctx.agent_id, resolved.clone(), ts);
        }

        ToolOutput::ok(summary)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;

    fn notebook() -> Value {
        json!({
            "cells": [
                {"cell_type": "code", "metadata": {}, "source": "print(1)", "outputs": []},
                {"cell_type": "markdown", "metadata": {}, "source": "# title"}
            ],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        })
    }

    fn setup(ctx: &ToolContext, dir: &std::path::Path) -> PathBuf {
        let path = dir.join("nb.ipynb");
        std::fs::write(&path, serde_json::to_string(&notebook()).unwrap()).unwrap();
        let ts = crate::builtin::mtime_ms(&path).unwrap();
        ctx.registry
            .set_read_timestamp(&ctx.agent_id, path.clone(), ts);
        path
    }

    fn call(args: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: "n1".into(),
            name: "notebook_edit".into(),
            input: args,
        }
    }

    #[tokio::test]
    async fn replaces_cell_source() {
        let (dir, ctx) = testutil::ctx();
        let path = setup(&ctx, dir.path());
        let input = json!({
            "path": path.to_str().unwrap(),
            "cell_index": 0,
            "mode": "replace",
            "source": "print(2)"
        });
        assert!(NotebookEditTool.validate_input(&input, &ctx).await.is_ok());
        let out = NotebookEditTool.run(&call(input), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        let back: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["cells"][0]["source"], "print(2)");
    }

    #[tokio::test]
    async fn inserts_and_deletes_cells() {
        let (dir, ctx) = testutil::ctx();
        let path = setup(&ctx, dir.path());
        let insert = json!({
            "path": path.to_str().unwrap(),
            "cell_index": 1,
            "mode": "insert",
            "source": "x = 3",
            "cell_type": "code"
        });
        let out = NotebookEditTool.run(&call(insert), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        let back: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["cells"].as_array().unwrap().len(), 3);

        let delete = json!({
            "path": path.to_str().unwrap(),
            "cell_index": 1,
            "mode": "delete"
        });
        let out = NotebookEditTool.run(&call(delete), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        let back: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["cells"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_range_index_is_error() {
        let (dir, ctx) = testutil::ctx();
        let path = setup(&ctx, dir.path());
        let input = json!({
            "path": path.to_str().unwrap(),
            "cell_index": 9,
            "mode": "replace",
            "source": "x"
        });
        let out = NotebookEditTool.run(&call(input), &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("out of range"));
    }

    #[tokio::test]
    async fn non_notebook_extension_is_rejected() {
        let (_dir, ctx) = testutil::ctx();
        let input = json!({"path": "plain.txt", "cell_index": 0, "source": "x"});
        let err = NotebookEditTool
            .validate_input(&input, &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("not a notebook"));
    }

    #[tokio::test]
    async fn replace_without_source_is_rejected() {
        let (dir, ctx) = testutil::ctx();
        let path = setup(&ctx, dir.path());
        let input = json!({"path": path.to_str().unwrap(), "cell_index": 0});
        let err = NotebookEditTool
            .validate_input(&input, &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("requires 'source'"));
    }
}
