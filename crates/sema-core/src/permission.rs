// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use sema_config::{EngineConfig, Store};
use sema_runtime::{EngineEvent, EventBus};
use sema_tools::{PermissionKind, Tool, ToolContext};

/// Pipeline-safe commands: a shell command is auto-allowed when every pipe
/// segment's head token is in this set.
const SAFE_SINGLE: &[&str] = &[
    "pwd", "tree", "date", "which", "ls", "find", "grep", "head", "tail", "cat", "du", "wc",
    "echo", "env", "printenv",
];

/// `git <sub>` heads cleared by the whitelist.
const SAFE_GIT_SUBCOMMANDS: &[&str] = &["status", "diff", "log", "branch"];

/// A shell command is safe iff every pipe segment's head token is
/// whitelisted.  Chains joined by `&&`, `||`, `;`, or `&` are never
/// pre-cleared as a whole — each sub-command goes through the normal gate.
pub fn is_safe_command(command: &str) -> bool {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.contains(';') || trimmed.contains('&') || trimmed.contains("||") {
        return false;
    }
    trimmed.split('|').all(segment_is_safe)
}

fn segment_is_safe(segment: &str) -> bool {
    let mut tokens = segment.trim().split_whitespace();
    match tokens.next() {
        Some("git") => matches!(tokens.next(), Some(sub) if SAFE_GIT_SUBCOMMANDS.contains(&sub)),
        Some(head) => SAFE_SINGLE.contains(&head),
        None => false,
    }
}

/// Match one persisted `Bash(…)` grant against a concrete command.
fn shell_entry_matches(entry: &str, command: &str) -> bool {
    let Some(spec) = entry
        .strip_prefix("Bash(")
        .and_then(|s| s.strip_suffix(')'))
    else {
        return false;
    };
    match spec.strip_suffix(":*") {
        Some(prefix) => command.trim().starts_with(prefix),
        None => command.trim() == spec,
    }
}

/// The gate's verdict on one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allowed,
    /// The user answered with free text instead of a selection; the text goes
    /// back to the model and the rest of the batch continues.
    Feedback(String),
    /// The user refused; the batch abort token has been fired.
    Refused,
    /// The abort token fired while waiting for the user.
    Interrupted,
}

/// Multi-kind authorization state machine.  Session-scoped grants live here
/// (`global_edit_permission`); project-scoped grants are the `allowed_tools`
/// entries persisted through the [`Store`].
pub struct PermissionGate {
    config: Arc<EngineConfig>,
    bus: Arc<EventBus>,
    store: Arc<Store>,
    working_dir: PathBuf,
    allowed_tools: Mutex<Vec<String>>,
    global_edit_permission: AtomicBool,
}

impl PermissionGate {
    pub fn new(
        config: Arc<EngineConfig>,
        bus: Arc<EventBus>,
        store: Arc<Store>,
        working_dir: PathBuf,
    ) -> Self {
        let allowed_tools = store
            .load_project(&working_dir)
            .map(|p| p.allowed_tools)
            .unwrap_or_default();
        Self {
            config,
            bus,
            store,
            working_dir,
            allowed_tools: Mutex::new(allowed_tools),
            global_edit_permission: AtomicBool::new(false),
        }
    }

    /// A new session drops session-scoped grants and re-reads the project
    /// grants from disk.
    pub fn reset_session(&self) {
        self.global_edit_permission.store(false, Ordering::SeqCst);
        if let Ok(project) = self.store.load_project(&self.working_dir) {
            *self.allowed_tools.lock().unwrap() = project.allowed_tools;
        }
    }

    pub fn allowed_tools(&self) -> Vec<String> {
        self.allowed_tools.lock().unwrap().clone()
    }

    pub fn has_global_edit_permission(&self) -> bool {
        self.global_edit_permission.load(Ordering::SeqCst)
    }

    /// The decision procedure for one tool call.  Blocks on the
    /// request/response rendezvous when no grant applies.
    pub async fn check(&self, tool: &dyn Tool, input: &Value, ctx: &ToolContext) -> GateDecision {
        // Read-only tools always bypass the gate.
        if tool.is_read_only() {
            return GateDecision::Allowed;
        }
        // Tools outside the four kinds mutate nothing the gate guards.
        let Some(kind) = tool.permission_kind() else {
            return GateDecision::Allowed;
        };

        if self.kind_skipped(kind) {
            return GateDecision::Allowed;
        }

        if kind == PermissionKind::FileEdit
            && self.has_global_edit_permission()
            && self.path_inside_project(tool, input)
        {
            return GateDecision::Allowed;
        }

        if self.matches_grant(kind, tool, input) {
            return GateDecision::Allowed;
        }

        if kind == PermissionKind::Shell {
            if let Some(command) = input.get("command").and_then(Value::as_str) {
                if is_safe_command(command) {
                    debug!(command, "safe command auto-allowed");
                    return GateDecision::Allowed;
                }
            }
        }

        self.request_permission(kind, tool, input, ctx).await
    }

    fn kind_skipped(&self, kind: PermissionKind) -> bool {
        let skip = &self.config.auto_approve;
        match kind {
            PermissionKind::FileEdit => skip.file_edit,
            PermissionKind::Shell => skip.shell,
            PermissionKind::Skill => skip.skill,
            PermissionKind::McpTool => skip.mcp_tool,
        }
    }

    fn path_inside_project(&self, tool: &dyn Tool, input: &Value) -> bool {
        match tool.mutated_path(input) {
            Some(path) => {
                let resolved = if path.is_absolute() {
                    path
                } else {
                    self.working_dir.join(path)
                };
                resolved.starts_with(&self.working_dir)
            }
            None => false,
        }
    }

    fn matches_grant(&self, kind: PermissionKind, tool: &dyn Tool, input: &Value) -> bool {
        let entries = self.allowed_tools.lock().unwrap();
        match kind {
            PermissionKind::Shell => match input.get("command").and_then(Value::as_str) {
                Some(command) => entries.iter().any(|e| shell_entry_matches(e, command)),
                None => false,
            },
            _ => match tool.grant_entry(input) {
                Some(wanted) => entries.iter().any(|e| e == &wanted),
                None => false,
            },
        }
    }

    async fn request_permission(
        &self,
        kind: PermissionKind,
        tool: &dyn Tool,
        input: &Value,
        ctx: &ToolContext,
    ) -> GateDecision {
        let title = tool.permission_title(input);
        let content = tool.permission_content(input, ctx).await;
        let agent_id = ctx.agent_id.clone();
        let tool_name = tool.name().to_string();

        // Arm the waiter before emitting the request so a responder that
        // answers synchronously during delivery is not missed.
        let filter_agent = agent_id.clone();
        let filter_tool = tool_name.clone();
        let waiter = self.bus.waiter("tool:permission:response", move |ev| {
            matches!(
                ev,
                EngineEvent::PermissionResponse { agent_id: a, tool_name: t, .. }
                    if a == &filter_agent && t == &filter_tool
            )
        });
        self.bus.emit(EngineEvent::PermissionRequest {
            agent_id,
            tool_name,
            title,
            summary: None,
            content,
        });

        match waiter.wait(&ctx.abort).await {
            None => GateDecision::Interrupted,
            Some(EngineEvent::PermissionResponse { selected, .. }) => match selected.as_str() {
                "agree" => GateDecision::Allowed,
                "allow" => {
                    self.persist_grant(kind, tool, input);
                    GateDecision::Allowed
                }
                "refuse" => {
                    // Short-circuit the rest of the batch.
                    ctx.abort.cancel();
                    GateDecision::Refused
                }
                other => GateDecision::Feedback(other.to_string()),
            },
            Some(_) => GateDecision::Interrupted,
        }
    }

    fn persist_grant(&self, kind: PermissionKind, tool: &dyn Tool, input: &Value) {
        if kind == PermissionKind::FileEdit {
            self.global_edit_permission.store(true, Ordering::SeqCst);
            return;
        }
        let Some(entry) = tool.grant_entry(input) else {
            return;
        };
        debug!(entry = %entry, "persisting project grant");
        {
            let mut entries = self.allowed_tools.lock().unwrap();
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        let snapshot = self.allowed_tools();
        match self.store.load_project(&self.working_dir) {
            Ok(mut project) => {
                project.allowed_tools = snapshot;
                if let Err(e) = self.store.save_project(&self.working_dir, project) {
                    warn!(error = %e, "failed to persist allowed_tools");
                }
            }
            Err(e) => warn!(error = %e, "failed to load project config for grant"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Safe-command whitelist ────────────────────────────────────────────────

    #[test]
    fn bare_whitelisted_commands_are_safe() {
        for cmd in ["pwd", "ls -la", "cat README.md", "git status", "git diff HEAD~1"] {
            assert!(is_safe_command(cmd), "should be safe: {cmd}");
        }
    }

    #[test]
    fn non_whitelisted_commands_are_not_safe() {
        for cmd in ["cargo build", "rm -rf /tmp/x", "git push", "curl http://x"] {
            assert!(!is_safe_command(cmd), "should not be safe: {cmd}");
        }
    }

    #[test]
    fn pipeline_is_safe_iff_every_segment_head_is_whitelisted() {
        assert!(is_safe_command("git status | grep foo"));
        assert!(is_safe_command("cat a.txt | head -5 | wc -l"));
        assert!(!is_safe_command("git status | xargs rm"));
        assert!(!is_safe_command("cargo test | grep FAILED"));
    }

    #[test]
    fn chains_are_never_precleared() {
        assert!(!is_safe_command("ls && rm -rf /"));
        assert!(!is_safe_command("ls; echo hi"));
        assert!(!is_safe_command("ls || echo hi"));
        assert!(!is_safe_command("sleep 5 &"));
    }

    #[test]
    fn git_requires_whitelisted_subcommand() {
        assert!(is_safe_command("git log --oneline"));
        assert!(!is_safe_command("git commit -m x"));
        assert!(!is_safe_command("git"));
    }

    // ── Grant entry matching ──────────────────────────────────────────────────

    #[test]
    fn exact_bash_entry_matches_exact_command() {
        assert!(shell_entry_matches("Bash(cargo build)", "cargo build"));
        assert!(!shell_entry_matches("Bash(cargo build)", "cargo build --release"));
    }

    #[test]
    fn prefix_bash_entry_matches_by_prefix() {
        assert!(shell_entry_matches("Bash(cargo:*)", "cargo build --release"));
        assert!(shell_entry_matches("Bash(cargo:*)", "cargo test"));
        assert!(!shell_entry_matches("Bash(cargo:*)", "rustc main.rs"));
    }

    #[test]
    fn malformed_entries_never_match() {
        assert!(!shell_entry_matches("Skill(deploy)", "cargo build"));
        assert!(!shell_entry_matches("Bash(x", "x"));
    }
}
