// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use sema_config::{EngineConfig, Store, TranscriptWriter};
use sema_model::{Turn, UserTurn};
use sema_runtime::{
    AgentId, AgentRegistry, EngineEvent, EventBus, RunState, SessionErrorKind, SubscriptionId,
};
use sema_tools::{
    adapt_mcp_client, AskQuestionTool, BashTool, EditFileTool, ExitPlanModeTool, GlobTool,
    GrepTool, NotebookEditTool, PersistentShell, ReadFileTool, SkillSource, SkillTool,
    TodoWriteTool, Tool, ToolRegistry, WriteFileTool,
};

use crate::agent::{AgentLoop, LoopServices};
use crate::commands::{expand_arguments, parse_slash_command, CommandSource, StaticCommandSource};
use crate::compact::compact_history;
use crate::error::EngineError;
use crate::managers::{AgentManager, McpManager, ModelManager, SkillManager};
use crate::permission::PermissionGate;
use crate::prompts::system_prompt;
use crate::task::TaskTool;

/// Construction inputs for [`Engine::new`].
pub struct EngineParams {
    pub config: EngineConfig,
    pub working_dir: PathBuf,
    pub store: Store,
    /// Custom slash-command registry; `None` disables custom commands.
    pub command_source: Option<Arc<dyn CommandSource>>,
}

struct SessionHandle {
    id: String,
    agent_loop: Arc<AgentLoop>,
    transcript: Option<Arc<Mutex<TranscriptWriter>>>,
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            agent_loop: Arc::clone(&self.agent_loop),
            transcript: self.transcript.clone(),
        }
    }
}

/// The public engine façade: session lifecycle, user-input entry, response
/// routing, and the management CRUD surfaces.  Everything else flows through
/// the event bus.
pub struct Engine {
    config: Arc<EngineConfig>,
    working_dir: PathBuf,
    bus: Arc<EventBus>,
    agents: Arc<AgentRegistry>,
    store: Arc<Store>,
    gate: Arc<PermissionGate>,
    models: Arc<ModelManager>,
    mcp: Arc<McpManager>,
    skills: Arc<SkillManager>,
    agent_configs: Arc<AgentManager>,
    commands: Arc<dyn CommandSource>,
    shell: Arc<PersistentShell>,
    session: Mutex<Option<SessionHandle>>,
}

impl Engine {
    pub fn new(params: EngineParams) -> Self {
        let bus = Arc::new(EventBus::new());
        let agents = Arc::new(AgentRegistry::new(Arc::clone(&bus)));
        let store = Arc::new(params.store);
        let config = Arc::new(params.config);
        let gate = Arc::new(PermissionGate::new(
            Arc::clone(&config),
            Arc::clone(&bus),
            Arc::clone(&store),
            params.working_dir.clone(),
        ));
        Self {
            models: Arc::new(ModelManager::new(Arc::clone(&store))),
            mcp: Arc::new(McpManager::new()),
            skills: Arc::new(SkillManager::new()),
            agent_configs: Arc::new(AgentManager::new()),
            commands: params
                .command_source
                .unwrap_or_else(|| Arc::new(StaticCommandSource::default())),
            shell: Arc::new(PersistentShell::new(params.working_dir.clone())),
            working_dir: params.working_dir,
            config,
            bus,
            agents,
            store,
            gate,
            session: Mutex::new(None),
        }
    }

    // ── Management surfaces ──────────────────────────────────────────────────

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn mcp(&self) -> &Arc<McpManager> {
        &self.mcp
    }

    pub fn skills(&self) -> &Arc<SkillManager> {
        &self.skills
    }

    pub fn agent_configs(&self) -> &Arc<AgentManager> {
        &self.agent_configs
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn permission_gate(&self) -> &Arc<PermissionGate> {
        &self.gate
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on(event, handler)
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.once(event, handler)
    }

    pub fn off(&self, id: SubscriptionId) {
        self.bus.off(id)
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Initialize a session: reset session-scoped grants, build the tool
    /// registry (builtins + skills + MCP adapters + task), wire the agent
    /// loop, and emit `session:ready`.
    ///
    /// Fails fast with a configuration error when the `main` model pointer
    /// has no registered provider.
    pub async fn create_session(&self) -> Result<String, EngineError> {
        let model = self.models.main_provider()?;
        let quick = self.models.quick_provider()?;

        self.gate.reset_session();

        let mut mcp_tools: Vec<Arc<dyn Tool>> = Vec::new();
        for client in self.mcp.clients() {
            match adapt_mcp_client(Arc::clone(&client)).await {
                Ok(tools) => {
                    for t in tools {
                        mcp_tools.push(Arc::new(t));
                    }
                }
                Err(e) => warn!(
                    server = client.server_name(),
                    error = %e,
                    "skipping MCP server: listing tools failed"
                ),
            }
        }

        let services = LoopServices {
            bus: Arc::clone(&self.bus),
            agents: Arc::clone(&self.agents),
            model,
            quick_model: quick,
            config: Arc::clone(&self.config),
            gate: Arc::clone(&self.gate),
            working_dir: self.working_dir.clone(),
        };

        let task_tool = TaskTool::new(
            services.clone(),
            Arc::clone(&self.agent_configs),
            Arc::clone(&self.shell),
            Arc::clone(&self.skills),
            mcp_tools.clone(),
        );

        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool);
        registry.register(GlobTool);
        registry.register(GrepTool);
        registry.register(TodoWriteTool);
        registry.register(AskQuestionTool);
        registry.register(WriteFileTool);
        registry.register(EditFileTool);
        registry.register(NotebookEditTool);
        registry.register(BashTool::new(Arc::clone(&self.shell)));
        let skills: Arc<dyn SkillSource> = Arc::clone(&self.skills) as Arc<dyn SkillSource>;
        registry.register(SkillTool::new(skills));
        registry.register(ExitPlanModeTool);
        for tool in &mcp_tools {
            registry.register_arc(Arc::clone(tool));
        }
        registry.register(task_tool);

        let rules = self
            .store
            .load_project(&self.working_dir)
            .map(|p| p.rules)
            .unwrap_or_default();
        let prompt = system_prompt(self.config.system_prompt.as_deref(), &self.working_dir, &rules);

        let session_id = uuid::Uuid::new_v4().to_string();
        let transcript = match self.store.open_transcript(&session_id, &self.working_dir) {
            Ok(mut tw) => {
                if let Err(e) = tw.write_header(&session_id) {
                    warn!(error = %e, "transcript header write failed");
                }
                Some(Arc::new(Mutex::new(tw)))
            }
            Err(e) => {
                warn!(error = %e, "transcript disabled: {e}");
                None
            }
        };

        let main = AgentId::main();
        self.agents.set_history(&main, Vec::new());
        self.agents.set_run_state(&main, RunState::Idle);

        *self.session.lock().unwrap() = Some(SessionHandle {
            id: session_id.clone(),
            agent_loop: Arc::new(AgentLoop::new(services, Arc::new(registry), prompt)),
            transcript,
        });

        debug!(session_id = %session_id, "session ready");
        self.bus.emit(EngineEvent::SessionReady {
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    /// Tear down the session: fire any in-flight abort and drop all agent
    /// state.  Safe to call without an active session.
    pub fn dispose(&self) {
        let main = AgentId::main();
        self.agents.fire_abort(&main);
        for id in self.agents.known_agents() {
            self.agents.remove(&id);
        }
        *self.session.lock().unwrap() = None;
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().unwrap().as_ref().map(|s| s.id.clone())
    }

    // ── User input ───────────────────────────────────────────────────────────

    /// Route one line of user input: `/clear`, `/compact`, custom commands,
    /// or a normal model turn.  Turn errors are surfaced on the bus
    /// (`session:error` / `session:interrupted`), not returned.
    pub async fn process_user_input(&self, input: &str) -> Result<(), EngineError> {
        let session = self
            .session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::Config("no active session".to_string()))?;

        let main = AgentId::main();
        if self.agents.run_state(&main) != RunState::Idle {
            return Err(EngineError::Config(
                "a turn is already in progress".to_string(),
            ));
        }

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.store.record_input(&self.working_dir, trimmed) {
            warn!(error = %e, "failed to record input history");
        }
        self.append_transcript(&session, "user", trimmed);

        if !trimmed.starts_with('/') && self.agents.history(&main).is_empty() {
            self.bus.emit(EngineEvent::TopicUpdate {
                topic: first_line(trimmed, 80),
            });
        }

        match trimmed {
            "/clear" => {
                self.agents.set_history(&main, Vec::new());
                self.bus.emit(EngineEvent::SessionCleared);
                return Ok(());
            }
            "/compact" => return self.run_forced_compaction().await,
            _ => {}
        }

        let turn_input = match parse_slash_command(trimmed) {
            Some((name, args)) => match self.commands.resolve(&name) {
                Some(command) => {
                    let body = expand_arguments(&command.body, &args);
                    self.bus.emit(EngineEvent::CustomCommandResolved {
                        name: command.name.clone(),
                        body: body.clone(),
                    });
                    body
                }
                // Unknown slash commands go to the model verbatim.
                None => trimmed.to_string(),
            },
            None => trimmed.to_string(),
        };

        self.run_turn(&session, &main, turn_input).await
    }

    async fn run_turn(
        &self,
        session: &SessionHandle,
        agent_id: &AgentId,
        input: String,
    ) -> Result<(), EngineError> {
        let abort = self.agents.install_abort(agent_id);
        self.agents.set_run_state(agent_id, RunState::Busy);

        let outcome = session
            .agent_loop
            .run_turn(agent_id, &abort, UserTurn::text(input))
            .await;

        match &outcome {
            Ok(()) => {}
            Err(EngineError::Interrupted) => {
                self.bus.emit(EngineEvent::SessionInterrupted);
            }
            Err(EngineError::Api(msg)) => {
                self.bus.emit(EngineEvent::SessionError {
                    kind: SessionErrorKind::ApiError,
                    message: msg.clone(),
                });
            }
            Err(EngineError::Compact(msg)) => {
                self.bus.emit(EngineEvent::SessionError {
                    kind: SessionErrorKind::CompactError,
                    message: msg.clone(),
                });
            }
            Err(EngineError::Config(msg)) => {
                self.bus.emit(EngineEvent::SessionError {
                    kind: SessionErrorKind::ConfigError,
                    message: msg.clone(),
                });
            }
        }

        if let Some(text) = self.last_assistant_text(agent_id) {
            self.append_transcript(session, "assistant", &text);
        }

        self.agents.clear_abort(agent_id);
        self.agents.set_run_state(agent_id, RunState::Idle);
        Ok(())
    }

    /// `/compact`: unconditional compaction on the quick model, with the
    /// `compacting` run state and `compact:exec` statistics.
    async fn run_forced_compaction(&self) -> Result<(), EngineError> {
        let main = AgentId::main();
        let quick = self.models.quick_provider()?;
        let abort = self.agents.install_abort(&main);
        self.agents.set_run_state(&main, RunState::Compacting);

        let history = self.agents.history(&main);
        let result = compact_history(
            &history,
            &quick,
            self.config.compaction_keep_recent,
            &abort,
        )
        .await;

        match result {
            Ok(out) => {
                self.agents.set_history(&main, out.history);
                self.bus.emit(EngineEvent::CompactExec {
                    err_msg: None,
                    token_before: out.token_before,
                    token_compact: out.token_after,
                    compact_rate: if out.token_before == 0 {
                        0.0
                    } else {
                        out.token_after as f32 / out.token_before as f32
                    },
                });
            }
            Err(EngineError::Interrupted) => {
                self.bus.emit(EngineEvent::SessionInterrupted);
            }
            Err(e) => {
                self.bus.emit(EngineEvent::SessionError {
                    kind: SessionErrorKind::CompactError,
                    message: e.to_string(),
                });
                self.bus.emit(EngineEvent::CompactExec {
                    err_msg: Some(e.to_string()),
                    token_before: crate::compact::estimate_tokens(&history),
                    token_compact: crate::compact::estimate_tokens(&history),
                    compact_rate: 1.0,
                });
            }
        }

        self.agents.clear_abort(&main);
        self.agents.set_run_state(&main, RunState::Idle);
        Ok(())
    }

    /// Fire the current turn's abort token.  The turn unwinds to idle and
    /// emits `session:interrupted` exactly once.
    pub fn interrupt_session(&self) {
        if !self.agents.fire_abort(&AgentId::main()) {
            debug!("interrupt requested with no turn in flight");
        }
    }

    // ── Response routing ─────────────────────────────────────────────────────

    pub fn respond_to_tool_permission(&self, agent_id: &AgentId, tool_name: &str, selected: &str) {
        self.bus.emit(EngineEvent::PermissionResponse {
            agent_id: agent_id.clone(),
            tool_name: tool_name.to_string(),
            selected: selected.to_string(),
        });
    }

    pub fn respond_to_ask_question(&self, agent_id: &AgentId, answers: Vec<String>) {
        self.bus.emit(EngineEvent::AskQuestionResponse {
            agent_id: agent_id.clone(),
            answers,
        });
    }

    pub fn respond_to_plan_exit(&self, agent_id: &AgentId, selected: &str) {
        self.bus.emit(EngineEvent::PlanExitResponse {
            agent_id: agent_id.clone(),
            selected: selected.to_string(),
        });
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn append_transcript(&self, session: &SessionHandle, role: &str, content: &str) {
        if let Some(tw) = &session.transcript {
            let record = serde_json::json!({
                "at": chrono::Utc::now(),
                "role": role,
                "content": content,
            });
            if let Err(e) = tw.lock().unwrap().append(&record) {
                warn!(error = %e, "transcript append failed");
            }
        }
    }

    fn last_assistant_text(&self, agent_id: &AgentId) -> Option<String> {
        self.agents
            .history(agent_id)
            .iter()
            .rev()
            .find_map(|t| match t {
                Turn::Assistant(a) => {
                    let text = a.text_content();
                    (!text.is_empty()).then_some(text)
                }
                Turn::User(_) => None,
            })
    }
}

fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.len() <= max {
        line.to_string()
    } else {
        let mut cut = max;
        while !line.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &line[..cut])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
