// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use sema_model::ToolUseBlock;

use crate::builtin::glob_to_regex;
use crate::tool::{Tool, ToolContext, ToolOutput};

const DEFAULT_MATCH_LIMIT: usize = 100;

/// Regex content search over the working tree.
pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Regex search over file contents.\n\
         pattern: full regex (escape literal braces: \\{\\}). include: glob filter\n\
         such as *.rs. case_sensitive: true by default. limit: 100 matches by default.\n\
         output_mode: content (default, file:line:text) | files_with_matches | count.\n\
         Use files_with_matches for discovery, then read_file for details."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in (default: working directory)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob filter on file names, e.g. '*.rs'"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Case-sensitive search (default true)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches (default 100)"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["content", "files_with_matches", "count"],
                    "description": "Output format (default content)"
                }
            },
            "required": ["pattern"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let pattern = match call.input.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err("missing required parameter 'pattern'"),
        };
        let root = call
            .input
            .get("path")
            .and_then(|v| v.as_str())
            .map(|r| ctx.resolve_path(r))
            .unwrap_or_else(|| ctx.working_dir.clone());
        let include = call
            .input
            .get("include")
            .and_then(|v| v.as_str())
            .and_then(glob_to_regex);
        let case_sensitive = call
            .input
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let limit = call
            .input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MATCH_LIMIT as u64) as usize;
        let output_mode = call
            .input
            .get("output_mode")
            .and_then(|v| v.as_str())
            .unwrap_or("content")
            .to_string();

        debug!(pattern = %pattern, root = %root.display(), mode = %output_mode, "grep tool");

        let re = match RegexBuilder::new(&pattern)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(format!("invalid regex: {e}")),
        };

        let mut content_lines: Vec<String> = Vec::new();
        let mut per_file: Vec<(String, usize)> = Vec::new();
        let mut total = 0usize;

        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != ".git" && name != "target" && name != "node_modules"
        });
        'files: for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(inc) = &include {
                let name = entry.file_name().to_string_lossy();
                if !inc.is_match(&name) {
                    continue;
                }
            }
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                // Binary or unreadable files are skipped.
                continue;
            };
            let mut file_hits = 0usize;
            for (i, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    file_hits += 1;
                    total += 1;
                    if output_mode == "content" {
                        content_lines
                            .push(format!("{}:{}:{}", entry.path().display(), i + 1, line));
                    }
                    if total >= limit {
                        if file_hits > 0 {
                            per_file
                                .push((entry.path().display().to_string(), file_hits));
                        }
                        break 'files;
                    }
                }
            }
            if file_hits > 0 {
                per_file.push((entry.path().display().to_string(), file_hits));
            }
        }

        if total == 0 {
            return ToolOutput::ok("(no matches)");
        }

        let out = match output_mode.as_str() {
            "files_with_matches" => per_file
                .iter()
                .map(|(f, _)| f.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            "count" => {
                let mut lines: Vec<String> = per_file
                    .iter()
                    .map(|(f, n)| format!("{f}:{n}"))
                    .collect();
                lines.push(format!("total:{total}"));
                lines.join("\n")
            }
            _ => {
                let mut body = content_lines.join("\n");
                if total >= limit {
                    body.push_str(&format!("\n...[truncated at {limit} matches]"));
                }
                body
            }
        };
        ToolOutput::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
