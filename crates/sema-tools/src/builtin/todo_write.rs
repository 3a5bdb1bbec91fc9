// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;
use sema_runtime::{TodoItem, TodoStatus};

use crate::tool::{Tool, ToolContext, ToolOutput};

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\n\
         ## Statuses\n\
         - pending: not yet started\n\
         - in_progress: currently being worked on (only ONE at a time)\n\
         - completed: finished\n\n\
         ## When to use\n\
         Complex multi-step tasks (3+ distinct steps), or when the user provides\n\
         multiple tasks. Skip for single straightforward tasks.\n\n\
         Each item needs content (imperative, e.g. \"Run tests\") and active_form\n\
         (present continuous, e.g. \"Running tests\"). Calling todo_write replaces\n\
         the entire list. Mark items completed IMMEDIATELY after finishing them."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "The full todo list (replaces the existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {
                                "type": "string",
                                "description": "Imperative description of the task"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"],
                                "description": "Current status"
                            },
                            "active_form": {
                                "type": "string",
                                "description": "Present continuous form shown while in progress"
                            }
                        },
                        "required": ["content", "status", "active_form"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    fn is_read_only(&self) -> bool {
        // Mutates agent state; run serially, but never prompts.
        false
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let raw = match call.input.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err("missing 'todos' array"),
        };

        let mut items: Vec<TodoItem> = Vec::with_capacity(raw.len());
        for (i, item) in raw.iter().enumerate() {
            let content = match item.get("content").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(format!("todo {} missing 'content'", i + 1)),
            };
            let active_form = match item.get("active_form").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(format!("todo {} missing 'active_form'", i + 1)),
            };
            let status = match item.get("status").and_then(|v| v.as_str()) {
                Some("pending") => TodoStatus::Pending,
                Some("in_progress") => TodoStatus::InProgress,
                Some("completed") => TodoStatus::Completed,
                Some(other) => {
                    return ToolOutput::err(format!("invalid status '{other}' for todo {}", i + 1))
                }
                None => return ToolOutput::err(format!("todo {} missing 'status'", i + 1)),
            };
            items.push(TodoItem {
                content,
                status,
                active_form,
            });
        }

        debug!(count = items.len(), "todo_write tool");

        match ctx.registry.update_todos(&ctx.agent_id, items.clone()) {
            Ok(_) => ToolOutput::ok(format_todos(&items)),
            Err(e) => ToolOutput::err(e),
        }
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status {
                TodoStatus::Completed => "✓",
                TodoStatus::InProgress => "→",
                TodoStatus::Pending => "○",
            };
            format!("{icon} {}", t.content)
        })
        .collect();
    format!("Todos updated:\n{}", lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;

    fn call(args: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: "t1".into(),
            name: "todo_write".into(),
            input: args,
        }
    }

    #[tokio::test]
    async fn sets_todos_on_agent_state() {
        let (_dir, ctx) = testutil::ctx();
        let out = TodoWriteTool
            .run(
                &call(json!({"todos": [
                    {"content": "analyze", "status": "in_progress", "active_form": "Analyzing"},
                    {"content": "implement", "status": "pending", "active_form": "Implementing"}
                ]})),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let todos = ctx.registry.todos(&ctx.agent_id);
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TodoStatus::InProgress);
    }

    #[tokio::test]
    async fn rejects_second_in_progress() {
        let (_dir, ctx) = testutil::ctx();
        let out = TodoWriteTool
            .run(
                &call(json!({"todos": [
                    {"content": "a", "status": "in_progress", "active_form": "A-ing"},
                    {"content": "b", "status": "in_progress", "active_form": "B-ing"}
                ]})),
                &ctx,
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at most one"));
    }

    #[tokio::test]
    async fn rejects_unknown_status() {
        let (_dir, ctx) = testutil::ctx();
        let out = TodoWriteTool
            .run(
                &call(json!({"todos": [
                    {"content": "a", "status": "cancelled", "active_form": "A-ing"}
                ]})),
                &ctx,
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid status"));
    }

    #[tokio::test]
    async fn empty_list_clears_todos() {
        let (_dir, ctx) = testutil::ctx();
        ctx.registry
            .update_todos(
                &ctx.agent_id,
                vec![TodoItem {
                    content: "x".into(),
                    status: TodoStatus::Pending,
                    active_form: "X-ing".into(),
                }],
            )
            .unwrap();
        let out = TodoWriteTool.run(&call(json!({"todos": []})), &ctx).await;
        assert!(!out.is_error);
        assert!(ctx.registry.todos(&ctx.agent_id).is_empty());
        assert!(out.content.contains("cleared"));
    }
}
