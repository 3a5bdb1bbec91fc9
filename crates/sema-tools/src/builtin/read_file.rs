// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;
use sema_runtime::EngineEvent;

use crate::builtin::mtime_ms;
use crate::tool::{Tool, ToolContext, ToolOutput};

/// Default number of lines returned when the caller does not specify a limit.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.
const MAX_BYTES: usize = 20_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a file. Default: 200 lines / 20 KB — whichever comes first.\n\
         Lines are formatted as L{n}:content (1-indexed); strip the L{n}: prefix before\n\
         using content as edit_file old_string. When more lines exist, a pagination\n\
         notice shows the next offset. Reading a file is required before writing or\n\
         editing it. Batch multiple reads in parallel when exploring related files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let path = match call.input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err("missing required parameter 'path'"),
        };
        let offset = call.input.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %path, offset, limit, "read_file tool");

        let resolved = ctx.resolve_path(&path);
        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(format!("read error: {e}")),
        };

        let text = String::from_utf8_lossy(&bytes);
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset.saturating_sub(1);

        let mut selected: Vec<String> = Vec::new();
        let mut byte_count = 0usize;
        let mut truncated_by_bytes = false;
        for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
            let line_bytes = line.len() + 1;
            if byte_count + line_bytes > MAX_BYTES {
                truncated_by_bytes = true;
                break;
            }
            selected.push(format!("L{}:{}", i + 1, line));
            byte_count += line_bytes;
        }

        let last_shown = start + selected.len();
        let mut content = selected.join("\n");
        if last_shown < total {
            let reason = if truncated_by_bytes {
                format!("byte limit ({MAX_BYTES} B) reached")
            } else {
                format!("{} more lines", total - last_shown)
            };
            content.push_str(&format!(
                "\n...[{reason} — showing L{}-L{} of {total}; use offset={} to continue]",
                offset,
                offset + selected.len().saturating_sub(1),
                last_shown + 1
            ));
        }

        // Record the observed mtime so write/edit can detect stale writes.
        if let Some(ts) = mtime_ms(&resolved) {
            ctx.registry
                .set_read_timestamp(&ctx.agent_id, resolved.clone(), ts);
        }
        ctx.bus.emit(EngineEvent::FileReference {
            path: resolved.to_string_lossy().into_owned(),
        });

        ToolOutput::ok(content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
