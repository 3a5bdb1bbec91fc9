// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

const BASE_PROMPT: &str = "You are an AI coding assistant embedded in a development \
environment. You help with software engineering tasks: reading and editing code, \
running commands, searching the codebase, and answering questions about it.

Rules:
- Read a file before editing or overwriting it.
- Prefer edit_file over write_file for existing files.
- Use the dedicated tools (read_file, grep, glob) instead of shell equivalents.
- Keep responses concise; lead with the outcome.
- Batch independent read-only tool calls in a single turn so they run in parallel.";

const SUB_AGENT_PROMPT: &str = "You are a focused sub-agent. Complete exactly the task \
you were given and report the result as your final text. Do not ask the user \
questions; make reasonable decisions yourself and note them in your report.";

/// Build the main agent's system prompt.  A custom override replaces the
/// base prompt entirely; working directory and project rules are appended
/// either way.
pub fn system_prompt(custom: Option<&str>, working_dir: &Path, rules: &[String]) -> String {
    let mut out = custom.unwrap_or(BASE_PROMPT).to_string();
    out.push_str(&format!("\n\nWorking directory: {}", working_dir.display()));
    if !rules.is_empty() {
        out.push_str("\n\nProject rules:\n");
        for rule in rules {
            out.push_str(&format!("- {rule}\n"));
        }
    }
    out
}

/// System prompt for sub-agents spawned by the task tool.
pub fn sub_agent_prompt(working_dir: &Path) -> String {
    format!(
        "{SUB_AGENT_PROMPT}\n\nWorking directory: {}",
        working_dir.display()
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
