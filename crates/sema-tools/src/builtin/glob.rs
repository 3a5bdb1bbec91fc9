// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use sema_model::ToolUseBlock;

use crate::builtin::glob_to_regex;
use crate::tool::{Tool, ToolContext, ToolOutput};

const DEFAULT_MAX_RESULTS: usize = 200;

/// Recursive file search by glob pattern.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, newest first. Excludes .git/ and target/\n\
         automatically. max_results: 200 by default.\n\
         Examples: *.rs | **/*.rs | src/**/*.toml\n\
         For content search use grep; patterns are matched against paths relative\n\
         to the search root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '**/*.rs'"
                },
                "root": {
                    "type": "string",
                    "description": "Directory to search from (default: working directory)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 200)"
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
            .get("root")
            .and_then(|v| v.as_str())
            .map(|r| ctx.resolve_path(r))
            .unwrap_or_else(|| ctx.working_dir.clone());
        let max = call
            .input
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_RESULTS as u64) as usize;

        debug!(pattern = %pattern, root = %root.display(), "glob tool");

        // Bare patterns like `*.rs` are matched anywhere below the root.
        let effective = if pattern.contains('/') || pattern.starts_with("**") {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };
        let Some(re) = glob_to_regex(&effective) else {
            return ToolOutput::err(format!("invalid glob pattern: {pattern}"));
        };

        let mut matches: Vec<(std::path::PathBuf, u64)> = Vec::new();
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != ".git" && name != "target" && name != "node_modules"
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&root) {
                Ok(r) => r.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            if re.is_match(&rel) {
                let mtime = crate::builtin::mtime_ms(entry.path()).unwrap_or(0);
                matches.push((entry.into_path(), mtime));
            }
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));
        let truncated = matches.len() > max;
        matches.truncate(max);

        if matches.is_empty() {
            return ToolOutput::ok("(no matches)");
        }
        let mut out = matches
            .iter()
            .map(|(p, _)| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            out.push_str(&format!("\n...[truncated at {max} results]"));
        }
        ToolOutput::ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
