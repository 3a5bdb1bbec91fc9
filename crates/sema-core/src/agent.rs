// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sema_config::EngineConfig;
use sema_model::{
    AssistantTurn, ContentBlock, ModelProvider, ModelRequest, ResponseEvent, ToolResultBlock,
    ToolUseBlock, Turn, UserTurn,
};
use sema_runtime::signals::{INTERRUPT_MESSAGE, INTERRUPT_MESSAGE_FOR_TOOL_USE};
use sema_runtime::{AgentId, AgentRegistry, EngineEvent, EventBus};
use sema_tools::{ToolContext, ToolRegistry};

use crate::compact::{compact_history, estimate_tokens};
use crate::error::EngineError;
use crate::permission::PermissionGate;
use crate::scheduler::{ToolResultItem, ToolScheduler};

/// Shared handles every loop instance (main agent and sub-agents) runs on.
#[derive(Clone)]
pub struct LoopServices {
    pub bus: Arc<EventBus>,
    pub agents: Arc<AgentRegistry>,
    pub model: Arc<dyn ModelProvider>,
    pub quick_model: Arc<dyn ModelProvider>,
    pub config: Arc<EngineConfig>,
    pub gate: Arc<PermissionGate>,
    pub working_dir: PathBuf,
}

/// The streaming model↔tool loop for one agent.  Produces typed events on
/// the bus and mutates the agent's history through the registry; the caller
/// owns run-state transitions and error routing.
pub struct AgentLoop {
    services: LoopServices,
    tools: Arc<ToolRegistry>,
    scheduler: ToolScheduler,
    system_prompt: String,
}

enum StreamOutcome {
    Complete {
        blocks: Vec<ContentBlock>,
        duration_ms: u64,
    },
    Interrupted {
        partial_blocks: Vec<ContentBlock>,
        duration_ms: u64,
    },
}

impl AgentLoop {
    pub fn new(services: LoopServices, tools: Arc<ToolRegistry>, system_prompt: String) -> Self {
        let scheduler = ToolScheduler::new(Arc::clone(&tools), Arc::clone(&services.gate));
        Self {
            services,
            tools,
            scheduler,
            system_prompt,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Drive one user turn to completion: model round, tool batch, recurse
    /// until the model stops requesting tools.
    ///
    /// Cancellation is surfaced as [`EngineError::Interrupted`] from four
    /// checkpoints: before the request is built, after the stream completes,
    /// after the scheduler returns, and before recursing.  Partial assistant
    /// text is preserved and an interrupt marker appended.
    pub async fn run_turn(
        &self,
        agent_id: &AgentId,
        abort: &CancellationToken,
        input: UserTurn,
    ) -> Result<(), EngineError> {
        let svc = &self.services;
        svc.agents.append_turn(agent_id, Turn::User(input));

        let mut rounds = 0u32;
        loop {
            rounds += 1;
            if rounds > svc.config.max_tool_rounds {
                warn!(rounds, "tool-round budget exhausted; ending turn");
                svc.agents.append_turn(
                    agent_id,
                    Turn::assistant(format!(
                        "Stopping: the tool-call budget ({} rounds) was reached before the \
                         task finished.",
                        svc.config.max_tool_rounds
                    )),
                );
                self.emit_complete(agent_id);
                return Ok(());
            }

            // Checkpoint A — before building the request.
            if abort.is_cancelled() {
                return self.interrupt_exit(agent_id, false);
            }

            self.ensure_within_budget(agent_id, abort).await?;

            let request = ModelRequest {
                system: Some(self.system_prompt.clone()),
                messages: svc.agents.history(agent_id),
                tools: self.tools.schemas(),
            };

            let outcome = self.stream_turn(agent_id, request, abort).await?;
            let (blocks, duration_ms) = match outcome {
                StreamOutcome::Interrupted {
                    partial_blocks,
                    duration_ms,
                } => {
                    // Keep whatever streamed before the interrupt.
                    if !partial_blocks.is_empty() {
                        svc.agents.append_turn(
                            agent_id,
                            Turn::Assistant(AssistantTurn {
                                blocks: partial_blocks,
                                duration_ms,
                            }),
                        );
                    }
                    return self.interrupt_exit(agent_id, false);
                }
                StreamOutcome::Complete {
                    blocks,
                    duration_ms,
                } => (blocks, duration_ms),
            };

            // Checkpoint B — after the stream completes.
            let interrupted_after_stream = abort.is_cancelled();

            let turn = AssistantTurn {
                blocks,
                duration_ms,
            };
            let tool_uses: Vec<ToolUseBlock> = turn.tool_uses().into_iter().cloned().collect();
            svc.agents.append_turn(agent_id, Turn::Assistant(turn));
            self.emit_complete(agent_id);

            if interrupted_after_stream {
                return self.interrupt_exit(agent_id, false);
            }

            if tool_uses.is_empty() {
                return Ok(());
            }

            let ctx = ToolContext {
                agent_id: agent_id.clone(),
                registry: Arc::clone(&svc.agents),
                bus: Arc::clone(&svc.bus),
                abort: abort.clone(),
                working_dir: svc.working_dir.clone(),
            };
            let results = self.scheduler.run_batch(&tool_uses, &ctx).await;

            // Checkpoint C — after the scheduler returns.  Note: a refusal
            // cancels only the batch's child token; the turn recurses so the
            // model can see the rejection.
            let interrupted_in_tools = abort.is_cancelled();

            let rebuild = results
                .iter()
                .find_map(|r| r.control.clone().filter(|c| c.rebuild_context));

            svc.agents
                .append_turn(agent_id, Self::tool_result_turn(&results));

            if interrupted_in_tools {
                return self.interrupt_exit(agent_id, true);
            }

            // Context rebuild: discard prior messages and seed with the
            // rebuild message as a single plain user turn.
            if let Some(control) = rebuild {
                debug!(agent = %agent_id, "rebuilding context from control signal");
                svc.agents.set_history(
                    agent_id,
                    vec![Turn::User(UserTurn {
                        content: sema_model::UserContent::Blocks(control.rebuild_messages),
                        tool_use_result: None,
                        control: None,
                    })],
                );
            }

            // Checkpoint D — before recursing with the new history.
            if abort.is_cancelled() {
                return self.interrupt_exit(agent_id, true);
            }
        }
    }

    /// Compaction trigger: before a model round, when the estimated history
    /// tokens exceed the configured threshold, replace the oldest turns with
    /// a quick-model summary.  Failures are non-fatal here — the turn
    /// continues on the uncompacted history.
    async fn ensure_within_budget(
        &self,
        agent_id: &AgentId,
        abort: &CancellationToken,
    ) -> Result<(), EngineError> {
        let svc = &self.services;
        let history = svc.agents.history(agent_id);
        let estimate = estimate_tokens(&history);
        if estimate <= svc.config.compact_threshold_tokens {
            return Ok(());
        }
        debug!(estimate, threshold = svc.config.compact_threshold_tokens, "compaction triggered");

        match compact_history(
            &history,
            &svc.quick_model,
            svc.config.compaction_keep_recent,
            abort,
        )
        .await
        {
            Ok(out) => {
                svc.agents.set_history(agent_id, out.history);
                svc.bus.emit(EngineEvent::CompactExec {
                    err_msg: None,
                    token_before: out.token_before,
                    token_compact: out.token_after,
                    compact_rate: if out.token_before == 0 {
                        0.0
                    } else {
                        out.token_after as f32 / out.token_before as f32
                    },
                });
                Ok(())
            }
            Err(EngineError::Interrupted) => Err(EngineError::Interrupted),
            Err(e) => {
                warn!(error = %e, "inline compaction failed; continuing uncompacted");
                svc.bus.emit(EngineEvent::SessionError {
                    kind: sema_runtime::SessionErrorKind::CompactError,
                    message: e.to_string(),
                });
                svc.bus.emit(EngineEvent::CompactExec {
                    err_msg: Some(e.to_string()),
                    token_before: estimate,
                    token_compact: estimate,
                    compact_rate: 1.0,
                });
                Ok(())
            }
        }
    }

    /// One streaming model call.  Emits thinking/text chunk events as deltas
    /// arrive and accumulates the assistant turn's blocks; tool-use
    /// fragments are keyed by provider index until the stream ends.
    async fn stream_turn(
        &self,
        agent_id: &AgentId,
        request: ModelRequest,
        abort: &CancellationToken,
    ) -> Result<StreamOutcome, EngineError> {
        let svc = &self.services;
        let started = Instant::now();

        let mut stream = svc
            .model
            .query(request)
            .await
            .map_err(|e| EngineError::Api(e.to_string()))?;

        let mut text = String::new();
        let mut thinking = String::new();
        let mut pending: HashMap<u32, PendingToolUse> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    return Ok(StreamOutcome::Interrupted {
                        partial_blocks: assemble_blocks(thinking, text, HashMap::new()),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
                ev = stream.next() => ev,
            };
            match event {
                None => break,
                Some(Err(e)) => return Err(EngineError::Api(e.to_string())),
                Some(Ok(ResponseEvent::ThinkingDelta(delta))) => {
                    thinking.push_str(&delta);
                    svc.bus.emit(EngineEvent::ThinkingChunk {
                        agent_id: agent_id.clone(),
                        text: delta,
                    });
                }
                Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                    text.push_str(&delta);
                    svc.bus.emit(EngineEvent::TextChunk {
                        agent_id: agent_id.clone(),
                        text: delta,
                    });
                }
                Some(Ok(ResponseEvent::ToolUse {
                    index,
                    id,
                    name,
                    arguments,
                })) => {
                    let ptu = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptu.id = id;
                    }
                    if !name.is_empty() {
                        ptu.name = name;
                    }
                    ptu.args_buf.push_str(&arguments);
                }
                Some(Ok(ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                })) => {
                    svc.bus.emit(EngineEvent::ConversationUsage {
                        input_tokens,
                        output_tokens,
                    });
                }
                Some(Ok(ResponseEvent::Done)) => break,
                Some(Ok(ResponseEvent::Error(e))) => {
                    warn!("model stream warning: {e}");
                }
                Some(Ok(_)) => {}
            }
        }

        Ok(StreamOutcome::Complete {
            blocks: assemble_blocks(thinking, text, pending),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Build the synthetic user turn carrying a batch's results, in
    /// tool-use order, with the raw payload attached for UI replay.
    fn tool_result_turn(results: &[ToolResultItem]) -> Turn {
        let blocks: Vec<ToolResultBlock> = results
            .iter()
            .map(|r| ToolResultBlock {
                tool_use_id: r.tool_use_id.clone(),
                content: r.content.clone(),
                is_error: r.is_error,
            })
            .collect();
        let payload: Value = Value::Object(
            results
                .iter()
                .map(|r| (r.tool_use_id.clone(), Value::String(r.content.clone())))
                .collect(),
        );
        Turn::User(UserTurn::tool_results(blocks, Some(payload)))
    }

    fn emit_complete(&self, agent_id: &AgentId) {
        self.services.bus.emit(EngineEvent::MessageComplete {
            agent_id: agent_id.clone(),
        });
    }

    /// Append the interrupt marker and unwind with the dedicated error kind.
    fn interrupt_exit(&self, agent_id: &AgentId, during_tools: bool) -> Result<(), EngineError> {
        let marker = if during_tools {
            INTERRUPT_MESSAGE_FOR_TOOL_USE
        } else {
            INTERRUPT_MESSAGE
        };
        self.services.agents.append_turn(agent_id, Turn::user(marker));
        Err(EngineError::Interrupted)
    }
}

#[derive(Default)]
struct PendingToolUse {
    id: String,
    name: String,
    args_buf: String,
}

/// Assemble the assistant turn's blocks: thinking first, then text, then
/// tool uses ordered by provider index.  Tool calls with an empty name are
/// dropped — they cannot be dispatched and would corrupt the history sent
/// back on the next round.  Invalid JSON arguments degrade to `{}`.
fn assemble_blocks(
    thinking: String,
    text: String,
    pending: HashMap<u32, PendingToolUse>,
) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if !thinking.is_empty() {
        blocks.push(ContentBlock::thinking(thinking));
    }
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    let mut sorted: Vec<(u32, PendingToolUse)> = pending.into_iter().collect();
    sorted.sort_by_key(|(idx, _)| *idx);
    for (i, (_, ptu)) in sorted.into_iter().enumerate() {
        if ptu.name.is_empty() {
            warn!(tool_use_id = %ptu.id, "dropping tool use with empty name");
            continue;
        }
        let input: Value = if ptu.args_buf.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&ptu.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = %ptu.name, error = %e, "invalid tool arguments; substituting {{}}");
                    Value::Object(Default::default())
                }
            }
        };
        let id = if ptu.id.is_empty() {
            format!("toolu_synthetic_{i}")
        } else {
            ptu.id
        };
        blocks.push(ContentBlock::ToolUse(ToolUseBlock {
            id,
            name: ptu.name,
            input,
        }));
    }
    blocks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
