// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sema_model::Turn;

use crate::bus::EventBus;
use crate::events::EngineEvent;

/// Identifies one logically isolated run unit.  The main agent id is the
/// fixed sentinel `"main"`; sub-agents get freshly generated ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn sub() -> Self {
        Self(format!("agent-{}", uuid::Uuid::new_v4()))
    }

    pub fn is_main(&self) -> bool {
        self.0 == "main"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One todo item managed by the `todo_write` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    /// Present-continuous form shown while the item is in progress.
    pub active_form: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Busy,
    Compacting,
}

/// All mutable per-agent session state.
#[derive(Debug, Default)]
pub struct AgentState {
    pub history: Vec<Turn>,
    /// Absolute path → last observed mtime in milliseconds.  Written on
    /// every successful read; consulted by write/edit to reject stale writes.
    pub read_file_timestamps: HashMap<PathBuf, u64>,
    pub todos: Vec<TodoItem>,
    pub run_state: RunState,
    /// The cancellation token shared by every suspension point of the
    /// current turn.  `None` while idle.
    pub abort: Option<CancellationToken>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Thread-safe `AgentId → AgentState` registry.  Absent ids are lazily
/// created.  All session state is indexed here rather than held in globals,
/// so isolated sessions can run concurrently in tests.
pub struct AgentRegistry {
    bus: Arc<EventBus>,
    agents: Mutex<HashMap<AgentId, Arc<Mutex<AgentState>>>>,
}

impl AgentRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for one agent's state, created on first reference.
    pub fn for_agent(&self, id: &AgentId) -> Arc<Mutex<AgentState>> {
        let mut agents = self.agents.lock().unwrap();
        Arc::clone(
            agents
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(AgentState::default()))),
        )
    }

    /// Drop an agent's state.  Used when a sub-agent's outer loop returns.
    pub fn remove(&self, id: &AgentId) {
        self.agents.lock().unwrap().remove(id);
    }

    pub fn known_agents(&self) -> Vec<AgentId> {
        self.agents.lock().unwrap().keys().cloned().collect()
    }

    // ── History ──────────────────────────────────────────────────────────────

    pub fn append_turn(&self, id: &AgentId, turn: Turn) {
        let state = self.for_agent(id);
        state.lock().unwrap().history.push(turn);
    }

    pub fn history(&self, id: &AgentId) -> Vec<Turn> {
        self.for_agent(id).lock().unwrap().history.clone()
    }

    /// Replace the whole history.  Used by `/clear`, compaction, and the
    /// rebuild-context control signal.
    pub fn set_history(&self, id: &AgentId, history: Vec<Turn>) {
        self.for_agent(id).lock().unwrap().history = history;
    }

    // ── Read timestamps ──────────────────────────────────────────────────────

    pub fn set_read_timestamp(&self, id: &AgentId, path: impl Into<PathBuf>, mtime_ms: u64) {
        let state = self.for_agent(id);
        state
            .lock()
            .unwrap()
            .read_file_timestamps
            .insert(path.into(), mtime_ms);
    }

    pub fn read_timestamp(&self, id: &AgentId, path: &Path) -> Option<u64> {
        self.for_agent(id)
            .lock()
            .unwrap()
            .read_file_timestamps
            .get(path)
            .copied()
    }

    // ── Todos ────────────────────────────────────────────────────────────────

    /// Replace the todo list after validating its invariants.  Emits
    /// `todos:update` only when the list actually changed.
    pub fn update_todos(&self, id: &AgentId, todos: Vec<TodoItem>) -> Result<bool, String> {
        let in_progress = todos
            .iter()
            .filter(|t| t.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Err("at most one todo can be in_progress at a time".to_string());
        }
        for t in &todos {
            if t.content.trim().is_empty() {
                return Err("todo content must not be empty".to_string());
            }
            if t.active_form.trim().is_empty() {
                return Err("todo active_form must not be empty".to_string());
            }
        }

        let changed = {
            let state = self.for_agent(id);
            let mut state = state.lock().unwrap();
            if state.todos == todos {
                false
            } else {
                state.todos = todos.clone();
                true
            }
        };
        if changed {
            debug!(agent = %id, count = todos.len(), "todos updated");
            self.bus.emit(EngineEvent::TodosUpdate {
                agent_id: id.clone(),
                todos,
            });
        }
        Ok(changed)
    }

    pub fn todos(&self, id: &AgentId) -> Vec<TodoItem> {
        self.for_agent(id).lock().unwrap().todos.clone()
    }

    // ── Run state ────────────────────────────────────────────────────────────

    /// Transition the agent's run state, emitting `state:update` on change.
    pub fn set_run_state(&self, id: &AgentId, run_state: RunState) {
        let changed = {
            let state = self.for_agent(id);
            let mut state = state.lock().unwrap();
            if state.run_state == run_state {
                false
            } else {
                state.run_state = run_state;
                true
            }
        };
        if changed {
            self.bus.emit(EngineEvent::StateUpdate {
                agent_id: id.clone(),
                state: run_state,
            });
        }
    }

    pub fn run_state(&self, id: &AgentId) -> RunState {
        self.for_agent(id).lock().unwrap().run_state
    }

    // ── Abort handle ─────────────────────────────────────────────────────────

    /// Install the turn's cancellation token.  Replaces any previous one.
    pub fn install_abort(&self, id: &AgentId) -> CancellationToken {
        let token = CancellationToken::new();
        self.for_agent(id).lock().unwrap().abort = Some(token.clone());
        token
    }

    /// Install a child of `parent` so that firing the parent cascades.
    pub fn install_child_abort(&self, id: &AgentId, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.for_agent(id).lock().unwrap().abort = Some(token.clone());
        token
    }

    pub fn clear_abort(&self, id: &AgentId) {
        self.for_agent(id).lock().unwrap().abort = None;
    }

    /// Fire the current turn's abort token, if any.  Returns `true` when a
    /// token was present.
    pub fn fire_abort(&self, id: &AgentId) -> bool {
        let token = self.for_agent(id).lock().unwrap().abort.clone();
        match token {
            Some(t) => {
                t.cancel();
                true
            }
            None => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn registry() -> (Arc<EventBus>, AgentRegistry) {
        let bus = Arc::new(EventBus::new());
        let reg = AgentRegistry::new(Arc::clone(&bus));
        (bus, reg)
    }

    fn todo(content: &str, status: TodoStatus) -> TodoItem {
        TodoItem {
            content: content.to_string(),
            status,
            active_form: format!("{content}-ing"),
        }
    }

    #[test]
    fn absent_agent_is_lazily_created() {
        let (_bus, reg) = registry();
        let id = AgentId::sub();
        assert!(reg.history(&id).is_empty());
        assert_eq!(reg.known_agents(), vec![id]);
    }

    #[test]
    fn sub_agent_ids_are_unique() {
        assert_ne!(AgentId::sub(), AgentId::sub());
        assert_eq!(AgentId::main(), AgentId::main());
    }

    #[test]
    fn append_and_replace_history() {
        let (_bus, reg) = registry();
        let id = AgentId::main();
        reg.append_turn(&id, Turn::user("hi"));
        reg.append_turn(&id, Turn::assistant("yo"));
        assert_eq!(reg.history(&id).len(), 2);
        reg.set_history(&id, vec![]);
        assert!(reg.history(&id).is_empty());
    }

    #[test]
    fn read_timestamps_are_per_agent() {
        let (_bus, reg) = registry();
        let a = AgentId::main();
        let b = AgentId::sub();
        reg.set_read_timestamp(&a, "/tmp/x", 100);
        assert_eq!(reg.read_timestamp(&a, Path::new("/tmp/x")), Some(100));
        assert_eq!(reg.read_timestamp(&b, Path::new("/tmp/x")), None);
    }

    #[test]
    fn update_todos_rejects_two_in_progress() {
        let (_bus, reg) = registry();
        let err = reg
            .update_todos(
                &AgentId::main(),
                vec![
                    todo("a", TodoStatus::InProgress),
                    todo("b", TodoStatus::InProgress),
                ],
            )
            .unwrap_err();
        assert!(err.contains("at most one"));
    }

    #[test]
    fn update_todos_rejects_empty_content() {
        let (_bus, reg) = registry();
        let err = reg
            .update_todos(&AgentId::main(), vec![todo("  ", TodoStatus::Pending)])
            .unwrap_err();
        assert!(err.contains("content"));
    }

    #[test]
    fn update_todos_emits_only_on_diff() {
        let (bus, reg) = registry();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on("todos:update", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let todos = vec![todo("a", TodoStatus::Pending)];
        assert!(reg.update_todos(&AgentId::main(), todos.clone()).unwrap());
        assert!(!reg.update_todos(&AgentId::main(), todos).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_state_transition_emits_once() {
        let (bus, reg) = registry();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on("state:update", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        reg.set_run_state(&AgentId::main(), RunState::Busy);
        reg.set_run_state(&AgentId::main(), RunState::Busy);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(reg.run_state(&AgentId::main()), RunState::Busy);
    }

    #[test]
    fn child_abort_cascades_from_parent() {
        let (_bus, reg) = registry();
        let parent_id = AgentId::main();
        let child_id = AgentId::sub();
        let parent = reg.install_abort(&parent_id);
        let child = reg.install_child_abort(&child_id, &parent);
        assert!(!child.is_cancelled());
        assert!(reg.fire_abort(&parent_id));
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_completion_does_not_cancel_parent() {
        let (_bus, reg) = registry();
        let parent = reg.install_abort(&AgentId::main());
        let child_id = AgentId::sub();
        let _child = reg.install_child_abort(&child_id, &parent);
        assert!(reg.fire_abort(&child_id));
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn fire_abort_without_token_is_false() {
        let (_bus, reg) = registry();
        assert!(!reg.fire_abort(&AgentId::main()));
    }
}
