// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use sema_config::{ModelPointers, ModelProfile, Store};
use sema_model::ModelProvider;
use sema_tools::{McpClient, Skill, SkillSource};

use crate::error::EngineError;

/// Named model providers plus the `{main, quick}` pointers, persisted to
/// `models.json`.  Providers themselves are supplied by the embedder; only
/// profiles and pointer names go to disk.
pub struct ModelManager {
    store: Arc<Store>,
    providers: Mutex<HashMap<String, Arc<dyn ModelProvider>>>,
    pointers: Mutex<ModelPointers>,
}

impl ModelManager {
    pub fn new(store: Arc<Store>) -> Self {
        let pointers = store
            .load_models()
            .ok()
            .and_then(|m| m.pointers)
            .unwrap_or_default();
        Self {
            store,
            providers: Mutex::new(HashMap::new()),
            pointers: Mutex::new(pointers),
        }
    }

    pub fn register_provider(&self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.lock().unwrap().insert(name.into(), provider);
    }

    pub fn remove_provider(&self, name: &str) {
        self.providers.lock().unwrap().remove(name);
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Persist a model profile (metadata only) to `models.json`.
    pub fn save_profile(&self, name: &str, profile: ModelProfile) -> anyhow::Result<()> {
        let mut models = self.store.load_models()?;
        models.profiles.insert(name.to_string(), profile);
        self.store.save_models(&models)
    }

    pub fn delete_profile(&self, name: &str) -> anyhow::Result<()> {
        let mut models = self.store.load_models()?;
        models.profiles.remove(name);
        self.store.save_models(&models)
    }

    pub fn pointers(&self) -> ModelPointers {
        self.pointers.lock().unwrap().clone()
    }

    /// Repoint `main` or `quick` and persist the choice.
    pub fn set_pointer(&self, which: &str, name: &str) -> anyhow::Result<()> {
        {
            let mut ptrs = self.pointers.lock().unwrap();
            match which {
                "main" => ptrs.main = name.to_string(),
                "quick" => ptrs.quick = name.to_string(),
                other => anyhow::bail!("unknown model pointer: {other}"),
            }
        }
        let mut models = self.store.load_models()?;
        models.pointers = Some(self.pointers());
        self.store.save_models(&models)
    }

    /// Resolve the `main` pointer to a registered provider.
    pub fn main_provider(&self) -> Result<Arc<dyn ModelProvider>, EngineError> {
        self.resolve(&self.pointers().main)
    }

    /// Resolve the `quick` pointer, falling back to `main` when the quick
    /// profile has no registered provider.
    pub fn quick_provider(&self) -> Result<Arc<dyn ModelProvider>, EngineError> {
        let ptrs = self.pointers();
        self.resolve(&ptrs.quick).or_else(|_| self.resolve(&ptrs.main))
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn ModelProvider>, EngineError> {
        self.providers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("no provider registered as '{name}'")))
    }
}

/// Connected MCP clients, adapted into tools when a session is created.
#[derive(Default)]
pub struct McpManager {
    clients: Mutex<Vec<Arc<dyn McpClient>>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&self, client: Arc<dyn McpClient>) {
        debug!(server = client.server_name(), "mcp client registered");
        self.clients.lock().unwrap().push(client);
    }

    pub fn remove_client(&self, server_name: &str) {
        self.clients
            .lock()
            .unwrap()
            .retain(|c| c.server_name() != server_name);
    }

    pub fn clients(&self) -> Vec<Arc<dyn McpClient>> {
        self.clients.lock().unwrap().clone()
    }
}

/// Mutable skill registry with the project-over-user precedence of the
/// [`SkillSource`] contract.
#[derive(Default)]
pub struct SkillManager {
    inner: RwLock<SkillScopes>,
}

#[derive(Default)]
struct SkillScopes {
    project: HashMap<String, Skill>,
    user: HashMap<String, Skill>,
}

impl SkillManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_project_skill(&self, skill: Skill) {
        self.inner
            .write()
            .unwrap()
            .project
            .insert(skill.name.clone(), skill);
    }

    pub fn set_user_skill(&self, skill: Skill) {
        self.inner
            .write()
            .unwrap()
            .user
            .insert(skill.name.clone(), skill);
    }

    pub fn remove_skill(&self, name: &str) {
        let mut scopes = self.inner.write().unwrap();
        scopes.project.remove(name);
        scopes.user.remove(name);
    }
}

impl SkillSource for SkillManager {
    fn get(&self, name: &str) -> Option<Skill> {
        let scopes = self.inner.read().unwrap();
        scopes
            .project
            .get(name)
            .or_else(|| scopes.user.get(name))
            .cloned()
    }

    fn list(&self) -> Vec<(String, String)> {
        let scopes = self.inner.read().unwrap();
        let mut merged: HashMap<String, String> = scopes
            .user
            .values()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        for s in scopes.project.values() {
            merged.insert(s.name.clone(), s.description.clone());
        }
        let mut out: Vec<(String, String)> = merged.into_iter().collect();
        out.sort();
        out
    }
}

/// One named sub-agent profile the task tool can spawn.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    pub name: String,
    pub description: String,
    /// Tool names available to the sub-agent; `None` means the default set.
    pub tools: Option<Vec<String>>,
    pub system_prompt: Option<String>,
}

/// Named sub-agent profiles.
#[derive(Default)]
pub struct AgentManager {
    configs: RwLock<HashMap<String, SubAgentConfig>>,
}

impl AgentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&self, config: SubAgentConfig) {
        self.configs
            .write()
            .unwrap()
            .insert(config.name.clone(), config);
    }

    pub fn remove_config(&self, name: &str) {
        self.configs.write().unwrap().remove(name);
    }

    pub fn get(&self, name: &str) -> Option<SubAgentConfig> {
        self.configs.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
