// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sema_model::{ControlSignal, ToolUseBlock};
use sema_runtime::{AgentId, AgentRegistry, EventBus, PermissionContent};

/// The authorization kind a mutating tool falls under.  Tools returning
/// `None` are outside the gate entirely (read-only tools, and tools whose
/// only effect is a UI rendezvous).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    FileEdit,
    Shell,
    Skill,
    McpTool,
}

/// Everything a tool body may touch besides its own configuration: the
/// calling agent's identity and state, the event bus, the turn's abort
/// token, and the session working directory.
#[derive(Clone)]
pub struct ToolContext {
    pub agent_id: AgentId,
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<EventBus>,
    pub abort: CancellationToken,
    pub working_dir: PathBuf,
}

impl ToolContext {
    /// Resolve a possibly relative path against the session working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Display content for the UI.
    pub content: String,
    /// The text handed back to the model as the tool result block.  Usually
    /// equals `content`; tools may shape a terser model-facing variant.
    pub result_for_assistant: String,
    pub is_error: bool,
    /// Out-of-band directive to the agent loop (e.g. rebuild context on plan
    /// exit).
    pub control: Option<ControlSignal>,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            result_for_assistant: text.clone(),
            content: text,
            is_error: false,
            control: None,
        }
    }

    /// Success with a model-facing result that differs from the display text.
    pub fn ok_shaped(content: impl Into<String>, result_for_assistant: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            result_for_assistant: result_for_assistant.into(),
            is_error: false,
            control: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self {
            result_for_assistant: text.clone(),
            content: text,
            is_error: true,
            control: None,
        }
    }

    pub fn with_control(mut self, control: ControlSignal) -> Self {
        self.control = Some(control);
        self
    }
}

/// Trait every built-in and adapted external tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema in the LLM tool-definition wire shape:
    /// `{type:"object", properties, required}`.
    fn input_schema(&self) -> Value;

    /// Read-only tools are eligible for parallel dispatch and bypass the
    /// permission gate.
    fn is_read_only(&self) -> bool;

    /// Which authorization kind this tool's mutations fall under.
    fn permission_kind(&self) -> Option<PermissionKind> {
        None
    }

    /// Tool-specific semantic validation, run after the structural schema
    /// check and before the gate.  A returned message becomes a per-tool
    /// error result; it never terminates the batch.
    async fn validate_input(&self, _input: &Value, _ctx: &ToolContext) -> Result<(), String> {
        Ok(())
    }

    /// Short title shown in the permission prompt.
    fn permission_title(&self, _input: &Value) -> String {
        self.name().to_string()
    }

    /// Rich content for the permission prompt (diff for file writes, the
    /// command line for shell).
    async fn permission_content(&self, input: &Value, _ctx: &ToolContext) -> PermissionContent {
        PermissionContent::Generic {
            summary: serde_json::to_string(input).unwrap_or_default(),
        }
    }

    /// The `allowed_tools` entry persisted when the user answers `allow`.
    /// `None` for tools that only support session-scoped grants (file edits).
    fn grant_entry(&self, _input: &Value) -> Option<String> {
        None
    }

    /// The path a file-edit tool is about to mutate, used by the gate's
    /// project-boundary check.
    fn mutated_path(&self, _input: &Value) -> Option<PathBuf> {
        None
    }

    /// Execute the tool.  Failures are reported through [`ToolOutput::err`];
    /// the scheduler turns panics into error results.
    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
