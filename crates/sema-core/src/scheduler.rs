// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tracing::{debug, warn};

use sema_model::{ControlSignal, ToolUseBlock};
use sema_runtime::signals::{feedback_message, TOOL_CANCELLED_MESSAGE, TOOL_REFUSED_MESSAGE};
use sema_runtime::EngineEvent;
use sema_tools::{validate_against_schema, ToolContext, ToolRegistry};

use crate::permission::{GateDecision, PermissionGate};

/// One tool's result, in tool-use order.
#[derive(Debug, Clone)]
pub struct ToolResultItem {
    pub tool_use_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
    pub control: Option<ControlSignal>,
}

impl ToolResultItem {
    fn new(block: &ToolUseBlock, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_use_id: block.id.clone(),
            tool_name: block.name.clone(),
            content: content.into(),
            is_error,
            control: None,
        }
    }

    fn cancelled(block: &ToolUseBlock) -> Self {
        Self::new(block, TOOL_CANCELLED_MESSAGE, true)
    }
}

/// Decides per batch whether tool calls run concurrently or strictly in
/// order, gates mutating tools, and preserves tool-use ordering in the
/// result sequence.
pub struct ToolScheduler {
    tools: Arc<ToolRegistry>,
    gate: Arc<PermissionGate>,
}

impl ToolScheduler {
    pub fn new(tools: Arc<ToolRegistry>, gate: Arc<PermissionGate>) -> Self {
        Self { tools, gate }
    }

    /// Execute one batch of tool-use blocks from a single assistant turn.
    ///
    /// All-read-only batches run concurrently; anything else runs strictly
    /// in order.  Results always come back in tool-use order.
    pub async fn run_batch(
        &self,
        batch: &[ToolUseBlock],
        ctx: &ToolContext,
    ) -> Vec<ToolResultItem> {
        let all_read_only = batch.iter().all(|b| {
            self.tools
                .get(&b.name)
                .map(|t| t.is_read_only())
                .unwrap_or(false)
        });

        if all_read_only {
            self.run_parallel(batch, ctx).await
        } else {
            self.run_serial(batch, ctx).await
        }
    }

    async fn run_parallel(&self, batch: &[ToolUseBlock], ctx: &ToolContext) -> Vec<ToolResultItem> {
        debug!(count = batch.len(), "dispatching read-only batch in parallel");
        let mut tasks = Vec::with_capacity(batch.len());
        for block in batch {
            let tools = Arc::clone(&self.tools);
            let gate = Arc::clone(&self.gate);
            let block = block.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                execute_one(&tools, &gate, &block, &ctx, false).await
            }));
        }

        // Await in submission order: invocations may finish in any order,
        // but the result sequence matches the batch.
        let mut results = Vec::with_capacity(batch.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let item = match task.await {
                Ok(item) => item,
                Err(e) => {
                    warn!(tool = %batch[i].name, error = %e, "tool task panicked");
                    ToolResultItem::new(&batch[i], format!("tool panicked: {e}"), true)
                }
            };
            results.push(item);
        }
        results
    }

    async fn run_serial(&self, batch: &[ToolUseBlock], ctx: &ToolContext) -> Vec<ToolResultItem> {
        debug!(count = batch.len(), "dispatching batch serially");
        // Refusal cancels this child token so the rest of the batch
        // short-circuits while the turn itself continues and can report the
        // rejection back to the model.  A user interrupt cancels the parent
        // and cascades here.
        let batch_ctx = ToolContext {
            abort: ctx.abort.child_token(),
            ..ctx.clone()
        };

        let mut results = Vec::with_capacity(batch.len());
        for block in batch {
            if batch_ctx.abort.is_cancelled() {
                results.push(ToolResultItem::cancelled(block));
                continue;
            }
            let tools = Arc::clone(&self.tools);
            let gate = Arc::clone(&self.gate);
            let block_owned = block.clone();
            let task_ctx = batch_ctx.clone();
            let item = match tokio::spawn(async move {
                execute_one(&tools, &gate, &block_owned, &task_ctx, true).await
            })
            .await
            {
                Ok(item) => item,
                Err(e) => {
                    warn!(tool = %block.name, error = %e, "tool task panicked");
                    ToolResultItem::new(block, format!("tool panicked: {e}"), true)
                }
            };
            results.push(item);
        }
        results
    }
}

/// Steps 1–5 of the per-tool execution contract: resolve, validate
/// structurally, validate semantically, gate, run.
async fn execute_one(
    tools: &ToolRegistry,
    gate: &PermissionGate,
    block: &ToolUseBlock,
    ctx: &ToolContext,
    gated: bool,
) -> ToolResultItem {
    let Some(tool) = tools.get(&block.name) else {
        return ToolResultItem::new(block, format!("unknown tool: {}", block.name), true);
    };

    if let Err(msg) = validate_against_schema(&tool.input_schema(), &block.input) {
        return ToolResultItem::new(block, msg, true);
    }
    if let Err(msg) = tool.validate_input(&block.input, ctx).await {
        return ToolResultItem::new(block, msg, true);
    }

    if gated && !tool.is_read_only() {
        if ctx.abort.is_cancelled() {
            return ToolResultItem::cancelled(block);
        }
        match gate.check(tool.as_ref(), &block.input, ctx).await {
            GateDecision::Allowed => {}
            GateDecision::Refused => {
                return ToolResultItem::new(block, TOOL_REFUSED_MESSAGE, true);
            }
            GateDecision::Feedback(text) => {
                return ToolResultItem::new(block, feedback_message(&text), false);
            }
            GateDecision::Interrupted => {
                return ToolResultItem::cancelled(block);
            }
        }
    }

    ctx.bus.emit(EngineEvent::ToolExecutionStart {
        agent_id: ctx.agent_id.clone(),
        tool_use_id: block.id.clone(),
        tool_name: block.name.clone(),
    });

    let output = tokio::select! {
        biased;
        _ = ctx.abort.cancelled() => {
            ctx.bus.emit(EngineEvent::ToolExecutionError {
                agent_id: ctx.agent_id.clone(),
                tool_use_id: block.id.clone(),
                tool_name: block.name.clone(),
                message: "cancelled".to_string(),
            });
            return ToolResultItem::cancelled(block);
        }
        output = tool.run(block, ctx) => output,
    };

    if output.is_error {
        ctx.bus.emit(EngineEvent::ToolExecutionError {
            agent_id: ctx.agent_id.clone(),
            tool_use_id: block.id.clone(),
            tool_name: block.name.clone(),
            message: output.content.clone(),
        });
    } else {
        ctx.bus.emit(EngineEvent::ToolExecutionComplete {
            agent_id: ctx.agent_id.clone(),
            tool_use_id: block.id.clone(),
            tool_name: block.name.clone(),
        });
    }

    ToolResultItem {
        tool_use_id: block.id.clone(),
        tool_name: block.name.clone(),
        content: output.result_for_assistant,
        is_error: output.is_error,
        control: output.control,
    }
}
