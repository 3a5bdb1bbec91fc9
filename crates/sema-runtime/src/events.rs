// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use crate::state::{AgentId, RunState, TodoItem};

/// Discriminates the `session:error` payload for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    ApiError,
    CompactError,
    ConfigError,
}

impl SessionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiError => "api_error",
            Self::CompactError => "compact_error",
            Self::ConfigError => "config_error",
        }
    }
}

/// Whether a file-edit permission prompt describes a brand-new file or a
/// modification of an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    New,
    Diff,
}

/// Payload of a `tool:permission:request` shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionContent {
    /// A shell command about to run.
    Command { command: String },
    /// A file write/edit, presented as a unified diff.
    FileDiff {
        kind: DiffKind,
        path: String,
        patch: String,
        diff_text: String,
    },
    /// Anything else — a one-line summary is all the UI gets.
    Generic { summary: String },
}

/// One multiple-choice question posed by the `ask_question` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub prompt: String,
    pub options: Vec<String>,
    pub allow_multiple: bool,
}

/// Questions batch carried by `ask:question:request`.
#[derive(Debug, Clone, PartialEq)]
pub struct AskQuestionPayload {
    pub agent_id: AgentId,
    pub questions: Vec<QuestionSpec>,
}

/// Every event the engine emits or consumes over the bus.  `name()` is the
/// bus topic; request/response pairs rendezvous on matching `agent_id`.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // ── Lifecycle ────────────────────────────────────────────────────────────
    SessionReady {
        session_id: String,
    },
    SessionError {
        kind: SessionErrorKind,
        message: String,
    },
    SessionInterrupted,
    SessionCleared,
    StateUpdate {
        agent_id: AgentId,
        state: RunState,
    },

    // ── Streaming ────────────────────────────────────────────────────────────
    ThinkingChunk {
        agent_id: AgentId,
        text: String,
    },
    TextChunk {
        agent_id: AgentId,
        text: String,
    },
    MessageComplete {
        agent_id: AgentId,
    },

    // ── Tools ────────────────────────────────────────────────────────────────
    PermissionRequest {
        agent_id: AgentId,
        tool_name: String,
        title: String,
        summary: Option<String>,
        content: PermissionContent,
    },
    PermissionResponse {
        agent_id: AgentId,
        tool_name: String,
        selected: String,
    },
    ToolExecutionStart {
        agent_id: AgentId,
        tool_use_id: String,
        tool_name: String,
    },
    ToolExecutionComplete {
        agent_id: AgentId,
        tool_use_id: String,
        tool_name: String,
    },
    ToolExecutionError {
        agent_id: AgentId,
        tool_use_id: String,
        tool_name: String,
        message: String,
    },

    // ── Sub-agents ───────────────────────────────────────────────────────────
    TaskAgentStart {
        agent_id: AgentId,
        description: String,
    },
    TaskAgentEnd {
        agent_id: AgentId,
    },

    // ── Plan mode ────────────────────────────────────────────────────────────
    PlanExitRequest {
        agent_id: AgentId,
        plan: String,
    },
    PlanExitResponse {
        agent_id: AgentId,
        selected: String,
    },
    PlanImplement {
        agent_id: AgentId,
    },

    // ── Q&A ──────────────────────────────────────────────────────────────────
    AskQuestionRequest(AskQuestionPayload),
    AskQuestionResponse {
        agent_id: AgentId,
        answers: Vec<String>,
    },

    // ── Context ──────────────────────────────────────────────────────────────
    ConversationUsage {
        input_tokens: u32,
        output_tokens: u32,
    },
    CompactExec {
        err_msg: Option<String>,
        token_before: usize,
        token_compact: usize,
        compact_rate: f32,
    },
    FileReference {
        path: String,
    },
    TopicUpdate {
        topic: String,
    },
    TodosUpdate {
        agent_id: AgentId,
        todos: Vec<TodoItem>,
    },

    // ── Commands ─────────────────────────────────────────────────────────────
    CustomCommandResolved {
        name: String,
        body: String,
    },
}

impl EngineEvent {
    /// The bus topic this event is delivered on.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionReady { .. } => "session:ready",
            Self::SessionError { .. } => "session:error",
            Self::SessionInterrupted => "session:interrupted",
            Self::SessionCleared => "session:cleared",
            Self::StateUpdate { .. } => "state:update",
            Self::ThinkingChunk { .. } => "message:thinking:chunk",
            Self::TextChunk { .. } => "message:text:chunk",
            Self::MessageComplete { .. } => "message:complete",
            Self::PermissionRequest { .. } => "tool:permission:request",
            Self::PermissionResponse { .. } => "tool:permission:response",
            Self::ToolExecutionStart { .. } => "tool:execution:start",
            Self::ToolExecutionComplete { .. } => "tool:execution:complete",
            Self::ToolExecutionError { .. } => "tool:execution:error",
            Self::TaskAgentStart { .. } => "task:agent:start",
            Self::TaskAgentEnd { .. } => "task:agent:end",
            Self::PlanExitRequest { .. } => "plan:exit:request",
            Self::PlanExitResponse { .. } => "plan:exit:response",
            Self::PlanImplement { .. } => "plan:implement",
            Self::AskQuestionRequest(_) => "ask:question:request",
            Self::AskQuestionResponse { .. } => "ask:question:response",
            Self::ConversationUsage { .. } => "conversation:usage",
            Self::CompactExec { .. } => "compact:exec",
            Self::FileReference { .. } => "file:reference",
            Self::TopicUpdate { .. } => "topic:update",
            Self::TodosUpdate { .. } => "todos:update",
            Self::CustomCommandResolved { .. } => "command:custom:resolved",
        }
    }
}
