// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::{ControlSignal, ToolUseBlock, UserBlock};
use sema_runtime::EngineEvent;

use crate::tool::{Tool, ToolContext, ToolOutput};

/// UI selection that asks the loop to discard the planning context and seed
/// a fresh implementation turn.
pub const CLEAR_CONTEXT_AND_START: &str = "clearContextAndStart";

/// UI selection that approves the plan but keeps the current context.
pub const KEEP_CONTEXT: &str = "keepContext";

/// Finish plan mode: present the plan to the user and, depending on their
/// choice, either continue in place or hand the loop a rebuild-context
/// control signal so implementation starts from a clean history.
pub struct ExitPlanModeTool;

#[async_trait]
impl Tool for ExitPlanModeTool {
    fn name(&self) -> &str {
        "exit_plan_mode"
    }

    fn description(&self) -> &str {
        "Present the finished plan to the user for approval.\n\
         Call this when planning is complete and you are ready to implement.\n\
         plan: the full plan as markdown. The user decides whether implementation\n\
         starts in a fresh context or continues in the current one."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": {
                    "type": "string",
                    "description": "The complete plan, as markdown"
                }
            },
            "required": ["plan"]
        })
    }

    fn is_read_only(&self) -> bool {
        // Rendezvous only; the control signal does the mutation in the loop.
        false
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let plan = match call.input.get("plan").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err("missing required parameter 'plan'"),
        };

        debug!(agent = %ctx.agent_id, "exit_plan_mode tool");

        let agent_id = ctx.agent_id.clone();
        let waiter = ctx.bus.waiter("plan:exit:response", move |ev| {
            matches!(
                ev,
                EngineEvent::PlanExitResponse { agent_id: a, .. } if a == &agent_id
            )
        });
        ctx.bus.emit(EngineEvent::PlanExitRequest {
            agent_id: ctx.agent_id.clone(),
            plan: plan.clone(),
        });

        match waiter.wait(&ctx.abort).await {
            Some(EngineEvent::PlanExitResponse { selected, .. }) => match selected.as_str() {
                CLEAR_CONTEXT_AND_START => {
                    ctx.bus.emit(EngineEvent::PlanImplement {
                        agent_id: ctx.agent_id.clone(),
                    });
                    let seed = format!(
                        "Implement the following plan:\n\n{plan}\n\nWork through it step by \
                         step, keeping the implementation consistent with the plan."
                    );
                    ToolOutput::ok("Plan approved. Starting implementation in a fresh context.")
                        .with_control(ControlSignal {
                            rebuild_context: true,
                            rebuild_messages: vec![UserBlock::Text { text: seed }],
                        })
                }
                KEEP_CONTEXT => {
                    ctx.bus.emit(EngineEvent::PlanImplement {
                        agent_id: ctx.agent_id.clone(),
                    });
                    ToolOutput::ok("Plan approved. Continuing in the current context.")
                }
                other => ToolOutput::ok(format!(
                    "The user did not approve the plan and responded: {other}"
                )),
            },
            _ => ToolOutput::err("interrupted while waiting for plan approval"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
