// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod mcp;
mod registry;
mod schema;
mod shell_exec;
mod tool;

pub use mcp::{adapt_mcp_client, McpCallResult, McpClient, McpTool, McpToolSpec};
pub use registry::ToolRegistry;
pub use schema::validate_against_schema;
pub use shell_exec::{ExecResult, PersistentShell};
pub use tool::{PermissionKind, Tool, ToolContext, ToolOutput};

pub use builtin::ask_question::AskQuestionTool;
pub use builtin::bash::BashTool;
pub use builtin::edit_file::EditFileTool;
pub use builtin::exit_plan_mode::ExitPlanModeTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::notebook_edit::NotebookEditTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::skill::{Skill, SkillSource, SkillTool, StaticSkillSource};
pub use builtin::todo_write::TodoWriteTool;
pub use builtin::write_file::WriteFileTool;
