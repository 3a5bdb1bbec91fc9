// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TIMEOUT_MS;

fn default_compact_threshold() -> usize {
    100_000
}

fn default_keep_recent() -> usize {
    2
}

fn default_max_tool_rounds() -> u32 {
    50
}

fn default_shell_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Per-kind permission skip flags.  A set flag makes the gate allow every
/// request of that kind without prompting.  All default to `false`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AutoApprove {
    #[serde(default)]
    pub file_edit: bool,
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub skill: bool,
    #[serde(default)]
    pub mcp_tool: bool,
}

/// Engine-wide configuration.  Everything here has a usable default so an
/// embedder can start with `EngineConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub auto_approve: AutoApprove,

    /// Estimated-token threshold above which the conversation history is
    /// compacted before the next model round.  The estimate is chars/4 over
    /// the full history; `/compact` ignores this threshold and always runs.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold_tokens: usize,

    /// Number of most recent turns preserved verbatim through compaction.
    #[serde(default = "default_keep_recent")]
    pub compaction_keep_recent: usize,

    /// Maximum number of model→tool rounds in a single user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Default shell command timeout.  Individual bash calls may request a
    /// longer timeout up to `MAX_TIMEOUT_MS`.
    #[serde(default = "default_shell_timeout_ms")]
    pub shell_timeout_ms: u64,

    /// Optional system prompt override for the main agent.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_approve: AutoApprove::default(),
            compact_threshold_tokens: default_compact_threshold(),
            compaction_keep_recent: default_keep_recent(),
            max_tool_rounds: default_max_tool_rounds(),
            shell_timeout_ms: default_shell_timeout_ms(),
            system_prompt: None,
        }
    }
}

/// Per-working-directory persisted project state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Permission grants persisted for this project.  Entry formats:
    /// `Bash(<prefix>:*)`, `Bash(<exact command>)`, `Skill(<name>)`,
    /// `mcp__<server>_<tool>`.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Ring of recent user inputs, newest last.
    #[serde(default)]
    pub history: Vec<String>,
    /// Free-form project rules injected into the system prompt.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Last-use timestamp, used for LRU eviction of project entries.
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One named model profile in `models.json`.  The engine never speaks a
/// provider wire protocol itself; a profile is resolved to a `ModelProvider`
/// implementation by the embedder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// The two model pointers the engine dereferences: `main` drives agent
/// turns, `quick` drives compaction summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPointers {
    pub main: String,
    pub quick: String,
}

impl Default for ModelPointers {
    fn default() -> Self {
        Self {
            main: "main".to_string(),
            quick: "quick".to_string(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_skip_flags() {
        let cfg = EngineConfig::default();
        assert!(!cfg.auto_approve.file_edit);
        assert!(!cfg.auto_approve.shell);
        assert!(!cfg.auto_approve.skill);
        assert!(!cfg.auto_approve.mcp_tool);
    }

    #[test]
    fn default_compact_threshold_is_documented_value() {
        assert_eq!(EngineConfig::default().compact_threshold_tokens, 100_000);
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_tool_rounds, 50);
        assert_eq!(cfg.shell_timeout_ms, crate::DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn project_config_roundtrips() {
        let mut pc = ProjectConfig::default();
        pc.allowed_tools.push("Bash(git status)".to_string());
        let json = serde_json::to_string(&pc).unwrap();
        let back: ProjectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.allowed_tools, pc.allowed_tools);
    }
}
