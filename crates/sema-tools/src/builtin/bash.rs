// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_config::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS};
use sema_model::ToolUseBlock;
use sema_runtime::PermissionContent;

use crate::shell_exec::PersistentShell;
use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from the head and tail of oversized output.  Errors and
/// summaries almost always appear at the end of build/test output, so the
/// tail is never sacrificed for the head.
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Commands rejected outright at validation, before the permission gate is
/// even consulted.  Head-token match per sub-command.
const BANNED_COMMANDS: &[&str] = &[
    "sudo", "su", "shutdown", "reboot", "halt", "poweroff", "mkfs", "fdisk", "dd",
];

pub struct BashTool {
    shell: Arc<PersistentShell>,
}

impl BashTool {
    pub fn new(shell: Arc<PersistentShell>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the persistent session shell and return\n\
         stdout + stderr. The working directory persists between calls.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100 lines\n\
         are preserved with an omission marker in the middle.\n\
         timeout_ms defaults to 120000 and is capped at 600000.\n\
         Prefer non-interactive commands; avoid commands that require a TTY.\n\
         Do NOT use bash for file operations: read files with read_file, search\n\
         with grep/glob, edit with edit_file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Execution timeout in milliseconds (optional)"
                },
                "description": {
                    "type": "string",
                    "description": "One-line description of what the command does"
                }
            },
            "required": ["command"]
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn permission_kind(&self) -> Option<PermissionKind> {
        Some(PermissionKind::Shell)
    }

    fn permission_title(&self, input: &Value) -> String {
        match input.get("command").and_then(|v| v.as_str()) {
            Some(c) => format!("Run: {c}"),
            None => "Run shell command".to_string(),
        }
    }

    async fn permission_content(&self, input: &Value, _ctx: &ToolContext) -> PermissionContent {
        PermissionContent::Command {
            command: input
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        }
    }

    fn grant_entry(&self, input: &Value) -> Option<String> {
        input
            .get("command")
            .and_then(|v| v.as_str())
            .map(|c| format!("Bash({})", c.trim()))
    }

    async fn validate_input(&self, input: &Value, _ctx: &ToolContext) -> Result<(), String> {
        let command = input
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or("missing required parameter 'command'")?;
        check_banned(command)
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let command = match call.input.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err("missing required parameter 'command'"),
        };
        let timeout_ms = call
            .input
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        debug!(cmd = %command, timeout_ms, "bash tool");

        let result = self.shell.exec(&command, &ctx.abort, timeout_ms).await;

        let mut content = String::new();
        if !result.stdout.is_empty() {
            content.push_str(&head_tail_truncate(&result.stdout));
        }
        if !result.stderr.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("stderr:\n");
            content.push_str(&head_tail_truncate(&result.stderr));
        }
        if result.interrupted {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str("(command interrupted)");
            return ToolOutput::err(content);
        }
        if result.code != 0 {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("exit code: {}", result.code));
            return ToolOutput::err(content);
        }
        if content.is_empty() {
            content.push_str("(no output)");
        }
        ToolOutput::ok(content)
    }
}

/// Reject banned commands.  Chains are split so `ls && sudo rm` is caught on
/// its second sub-command.
fn check_banned(command: &str) -> Result<(), String> {
    if command.contains(":(){") {
        return Err("command rejected: fork bomb pattern".to_string());
    }
    for sub in split_subcommands(command) {
        let head = sub.split_whitespace().next().unwrap_or("");
        if BANNED_COMMANDS.contains(&head) {
            return Err(format!("command '{head}' is banned"));
        }
        if head == "rm" && sub.split_whitespace().any(|t| t == "/" || t == "/*") {
            return Err("command rejected: rm targeting filesystem root".to_string());
        }
    }
    Ok(())
}

/// Split on `&&`, `||`, `;`, and `|` so each sub-command is analyzed on its
/// own.
fn split_subcommands(command: &str) -> Vec<&str> {
    command
        .split(&['&', '|', ';'][..])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Keep the first and last lines of oversized output with an omission marker
/// in the middle.
fn head_tail_truncate(text: &str) -> String {
    if text.len() <= OUTPUT_LIMIT_BYTES {
        return text.to_string();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= HEAD_LINES + TAIL_LINES {
        // Few very long lines: hard cut.
        let mut cut = text.as_bytes()[..OUTPUT_LIMIT_BYTES].to_vec();
        while !cut.is_empty() && std::str::from_utf8(&cut).is_err() {
            cut.pop();
        }
        let mut s = String::from_utf8(cut).unwrap_or_default();
        s.push_str("\n...[output truncated]");
        return s;
    }
    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[lines.len() - TAIL_LINES..].join("\n");
    let omitted = lines.len() - HEAD_LINES - TAIL_LINES;
    format!("{head}\n...[{omitted} lines omitted]...\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;

    fn tool(dir: &std::path::Path) -> BashTool {
        BashTool::new(Arc::new(PersistentShell::new(dir)))
    }

    fn call(args: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: "b1".into(),
            name: "bash".into(),
            input: args,
        }
    }

    #[tokio::test]
    async fn runs_command_and_returns_stdout() {
        let (dir, ctx) = testutil::ctx();
        let out = tool(dir.path())
            .run(&call(json!({"command": "echo hi"})), &ctx)
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_with_code() {
        let (dir, ctx) = testutil::ctx();
        let out = tool(dir.path())
            .run(&call(json!({"command": "false"})), &ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("exit code: 1"));
    }

    #[tokio::test]
    async fn timeout_reports_interrupted() {
        let (dir, ctx) = testutil::ctx();
        let out = tool(dir.path())
            .run(&call(json!({"command": "sleep 2", "timeout_ms": 50})), &ctx)
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("interrupted"));
        // A timeout never fires the session abort.
        assert!(!ctx.abort.is_cancelled());
    }

    #[tokio::test]
    async fn banned_command_fails_validation() {
        let (dir, ctx) = testutil::ctx();
        let err = tool(dir.path())
            .validate_input(&json!({"command": "sudo rm -rf /tmp/x"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("banned"));
    }

    #[tokio::test]
    async fn banned_command_in_chain_is_caught() {
        let (dir, ctx) = testutil::ctx();
        let err = tool(dir.path())
            .validate_input(&json!({"command": "ls && sudo id"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("banned"));
    }

    #[tokio::test]
    async fn rm_root_is_rejected() {
        let (dir, ctx) = testutil::ctx();
        let err = tool(dir.path())
            .validate_input(&json!({"command": "rm -rf /"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.contains("filesystem root"));
    }

    #[test]
    fn grant_entry_is_exact_command() {
        let shell = Arc::new(PersistentShell::new("/tmp"));
        let t = BashTool::new(shell);
        assert_eq!(
            t.grant_entry(&json!({"command": "git status"})),
            Some("Bash(git status)".to_string())
        );
    }

    #[test]
    fn head_tail_truncate_keeps_both_ends() {
        let big: String = (0..5000).map(|i| format!("line {i}\n")).collect();
        let out = head_tail_truncate(&big);
        assert!(out.contains("line 0"));
        assert!(out.contains("line 4999"));
        assert!(out.contains("lines omitted"));
    }
}
