// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::{ToolUseBlock, Turn, UserTurn};
use sema_runtime::{AgentId, EngineEvent, RunState};
use sema_tools::{
    BashTool, EditFileTool, GlobTool, GrepTool, NotebookEditTool, PersistentShell, ReadFileTool,
    SkillTool, TodoWriteTool, Tool, ToolContext, ToolOutput, ToolRegistry, WriteFileTool,
};

use crate::agent::{AgentLoop, LoopServices};
use crate::managers::{AgentManager, SkillManager};
use crate::prompts::sub_agent_prompt;

/// Spawns an isolated sub-agent: fresh agent id and state, a filtered tool
/// list, a child abort token linked to the parent, and a nested agent loop
/// run to completion.  The sub-agent's final assistant text is the tool
/// result.
#[derive(Clone)]
pub struct TaskTool {
    services: LoopServices,
    agent_configs: Arc<AgentManager>,
    shell: Arc<PersistentShell>,
    skills: Arc<SkillManager>,
    mcp_tools: Vec<Arc<dyn Tool>>,
}

impl TaskTool {
    pub fn new(
        services: LoopServices,
        agent_configs: Arc<AgentManager>,
        shell: Arc<PersistentShell>,
        skills: Arc<SkillManager>,
        mcp_tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        Self {
            services,
            agent_configs,
            shell,
            skills,
            mcp_tools,
        }
    }

    /// The sub-agent's default tool set.  `task` is included only when the
    /// profile's tool list names it, so sub-agents cannot nest by default.
    /// UI rendezvous tools (ask_question, exit_plan_mode) are never offered
    /// to sub-agents.
    fn build_sub_registry(&self, include_task: bool) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(GlobTool);
        reg.register(GrepTool);
        reg.register(TodoWriteTool);
        reg.register(WriteFileTool);
        reg.register(EditFileTool);
        reg.register(NotebookEditTool);
        reg.register(BashTool::new(Arc::clone(&self.shell)));
        let skills: Arc<dyn sema_tools::SkillSource> =
            Arc::clone(&self.skills) as Arc<dyn sema_tools::SkillSource>;
        reg.register(SkillTool::new(skills));
        for tool in &self.mcp_tools {
            reg.register_arc(Arc::clone(tool));
        }
        if include_task {
            reg.register(self.clone());
        }
        reg
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-agent to complete a focused task and return its final text output.\n\
         Useful for delegating isolated sub-tasks that would otherwise flood your\n\
         context. The sub-agent has its own history and tool set and cannot ask the\n\
         user questions. agent_type selects a named sub-agent profile when available."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Short (3-5 word) description of the task"
                },
                "prompt": {
                    "type": "string",
                    "description": "The full task for the sub-agent"
                },
                "agent_type": {
                    "type": "string",
                    "description": "Named sub-agent profile to use (optional)"
                }
            },
            "required": ["prompt"]
        })
    }

    fn is_read_only(&self) -> bool {
        // The sub-agent's own tools go through the gate individually.
        false
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let prompt = match call.input.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err("missing required parameter 'prompt'"),
        };
        let description = call
            .input
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("sub-agent task")
            .to_string();

        let profile = match call.input.get("agent_type").and_then(|v| v.as_str()) {
            Some(name) => match self.agent_configs.get(name) {
                Some(cfg) => Some(cfg),
                None => return ToolOutput::err(format!("unknown agent_type: {name}")),
            },
            None => None,
        };

        let sub_id = AgentId::sub();
        debug!(agent = %sub_id, description = %description, "spawning sub-agent");

        // Child token: firing the parent cancels the sub-agent, but the
        // sub-agent finishing never affects the parent.
        let child_abort = ctx.abort.child_token();

        let include_task = profile
            .as_ref()
            .and_then(|p| p.tools.as_ref())
            .map(|tools| tools.iter().any(|t| t == "task"))
            .unwrap_or(false);
        let registry = self.build_sub_registry(include_task);
        let registry = match profile.as_ref().and_then(|p| p.tools.clone()) {
            Some(names) => registry.filtered(Some(&names)),
            None => registry,
        };

        let system_prompt = profile
            .and_then(|p| p.system_prompt)
            .unwrap_or_else(|| sub_agent_prompt(&self.services.working_dir));

        self.services.bus.emit(EngineEvent::TaskAgentStart {
            agent_id: sub_id.clone(),
            description,
        });
        self.services.agents.set_run_state(&sub_id, RunState::Busy);

        let sub_loop = AgentLoop::new(
            self.services.clone(),
            Arc::new(registry),
            system_prompt,
        );
        let outcome = sub_loop
            .run_turn(&sub_id, &child_abort, UserTurn::text(prompt))
            .await;

        // The last assistant text in the sub-agent's history is its report.
        let final_text = self
            .services
            .agents
            .history(&sub_id)
            .iter()
            .rev()
            .find_map(|t| match t {
                Turn::Assistant(a) => {
                    let text = a.text_content();
                    (!text.is_empty()).then_some(text)
                }
                Turn::User(_) => None,
            });

        self.services.agents.set_run_state(&sub_id, RunState::Idle);
        self.services.agents.remove(&sub_id);
        self.services.bus.emit(EngineEvent::TaskAgentEnd {
            agent_id: sub_id.clone(),
        });

        match outcome {
            Ok(()) => ToolOutput::ok(
                final_text.unwrap_or_else(|| "(sub-agent produced no text output)".to_string()),
            ),
            Err(e) if e.is_interrupt() => ToolOutput::err("sub-agent interrupted"),
            Err(e) => ToolOutput::err(format!("sub-agent error: {e}")),
        }
    }
}
