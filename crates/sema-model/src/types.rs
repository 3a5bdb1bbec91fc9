// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Content blocks ───────────────────────────────────────────────────────────

/// One tool invocation requested by the model inside an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolUseBlock {
    /// Opaque identifier assigned by the model; echoed back in the matching
    /// tool result block.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub input: Value,
}

/// A single content block of an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse(ToolUseBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }
}

/// The result of one tool invocation, carried inside a user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A single content block of a user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    Text { text: String },
    ToolResult(ToolResultBlock),
}

/// Model-facing content of a user turn — plain text or structured blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<UserBlock>),
}

impl UserContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Blocks(_) => None,
        }
    }
}

// ─── Control signal ───────────────────────────────────────────────────────────

/// Out-of-band directive returned by a tool that instructs the loop to
/// rewrite the agent's history before the next iteration.  Used by plan-mode
/// exit: the planning context is replaced by the implementation seed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlSignal {
    pub rebuild_context: bool,
    /// The seed for the rebuilt history: content blocks of a single plain
    /// user turn.
    pub rebuild_messages: Vec<UserBlock>,
}

// ─── Turns ────────────────────────────────────────────────────────────────────

/// A user turn: content sent to the model, plus engine-side payloads that do
/// not reach the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserTurn {
    pub content: UserContent,
    /// Raw result payload of the tool batch that produced this turn, kept
    /// for UI replay; not sent to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlSignal>,
}

impl UserTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: UserContent::Text(text.into()),
            tool_use_result: None,
            control: None,
        }
    }

    pub fn tool_results(blocks: Vec<ToolResultBlock>, payload: Option<Value>) -> Self {
        Self {
            content: UserContent::Blocks(blocks.into_iter().map(UserBlock::ToolResult).collect()),
            tool_use_result: payload,
            control: None,
        }
    }
}

/// An assistant turn: the model's output blocks plus the wall-clock duration
/// of the generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantTurn {
    pub blocks: Vec<ContentBlock>,
    pub duration_ms: u64,
}

impl AssistantTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::text(text)],
            duration_ms: 0,
        }
    }

    /// Concatenation of all text blocks.
    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Concatenation of all thinking blocks.
    pub fn thinking_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse(tu) => Some(tu),
                _ => None,
            })
            .collect()
    }
}

/// One entry of an agent's message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserTurn::text(text))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant(AssistantTurn::text(text))
    }

    pub fn as_user(&self) -> Option<&UserTurn> {
        match self {
            Self::User(u) => Some(u),
            Self::Assistant(_) => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match self {
            Self::Assistant(a) => Some(a),
            Self::User(_) => None,
        }
    }

    /// chars/4 token estimate used by the compaction trigger.  Never returns
    /// zero so that even empty turns count against the budget.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Self::User(u) => match &u.content {
                UserContent::Text(t) => t.len(),
                UserContent::Blocks(blocks) => blocks
                    .iter()
                    .map(|b| match b {
                        UserBlock::Text { text } => text.len(),
                        UserBlock::ToolResult(tr) => tr.content.len(),
                    })
                    .sum(),
            },
            Self::Assistant(a) => a
                .blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.len(),
                    ContentBlock::Thinking { thinking } => thinking.len(),
                    ContentBlock::ToolUse(tu) => tu.name.len() + tu.input.to_string().len(),
                })
                .sum(),
        };
        (chars / 4).max(1)
    }
}

// ─── Requests and streaming ───────────────────────────────────────────────────

/// Tool definition in the LLM tool-use wire format:
/// `{type:"object", properties, required}` JSON schema under `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One completion request handed to a [`crate::ModelProvider`].
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolSchema>,
}

/// A single streamed event from the model adapter.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A tool-use fragment.  Providers may interleave fragments for several
    /// parallel calls, keyed by `index`; `arguments` accumulates raw JSON.
    ToolUse {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Done,
    /// Recoverable stream warning; fatal errors surface as `Err` items.
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
