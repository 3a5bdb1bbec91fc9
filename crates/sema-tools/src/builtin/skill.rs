// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;

use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

/// One loadable skill: metadata plus its markdown body.  Frontmatter parsing
/// happens outside the engine; sources hand over finished skills.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub body: String,
}

/// The skill registry boundary.  Project scope overrides user scope on name
/// collision.
pub trait SkillSource: Send + Sync {
    fn get(&self, name: &str) -> Option<Skill>;
    fn list(&self) -> Vec<(String, String)>;
}

/// In-memory source over two scope maps.  Embedders load these from their
/// skill directories.
#[derive(Default)]
pub struct StaticSkillSource {
    project: HashMap<String, Skill>,
    user: HashMap<String, Skill>,
}

impl StaticSkillSource {
    pub fn new(project: Vec<Skill>, user: Vec<Skill>) -> Self {
        Self {
            project: project.into_iter().map(|s| (s.name.clone(), s)).collect(),
            user: user.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }
}

impl SkillSource for StaticSkillSource {
    fn get(&self, name: &str) -> Option<Skill> {
        self.project
            .get(name)
            .or_else(|| self.user.get(name))
            .cloned()
    }

    fn list(&self) -> Vec<(String, String)> {
        let mut seen: HashMap<&str, &Skill> = HashMap::new();
        for s in self.user.values() {
            seen.insert(&s.name, s);
        }
        for s in self.project.values() {
            seen.insert(&s.name, s);
        }
        let mut out: Vec<(String, String)> = seen
            .values()
            .map(|s| (s.name.clone(), s.description.clone()))
            .collect();
        out.sort();
        out
    }
}

/// Load a named skill's instructions into the conversation.
pub struct SkillTool {
    source: Arc<dyn SkillSource>,
}

impl SkillTool {
    pub fn new(source: Arc<dyn SkillSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        "skill"
    }

    fn description(&self) -> &str {
        "Load a named skill: a packaged set of instructions for a particular kind of\n\
         task. The skill body is returned as the tool result; follow it in place of\n\
         your default approach. Only load skills you were told exist."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the skill to load"
                }
            },
            "required": ["name"]
        })
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn permission_kind(&self) -> Option<PermissionKind> {
        Some(PermissionKind::Skill)
    }

    fn permission_title(&self, input: &Value) -> String {
        match input.get("name").and_then(|v| v.as_str()) {
            Some(n) => format!("Load skill: {n}"),
            None => "Load skill".to_string(),
        }
    }

    fn grant_entry(&self, input: &Value) -> Option<String> {
        input
            .get("name")
            .and_then(|v| v.as_str())
            .map(|n| format!("Skill({n})"))
    }

    async fn run(&self, call: &ToolUseBlock, _ctx: &ToolContext) -> ToolOutput {
        let name = match call.input.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return ToolOutput::err("missing required parameter 'name'"),
        };
        debug!(skill = %name, "skill tool");
        match self.source.get(&name) {
            Some(skill) => ToolOutput::ok(format!("# Skill: {}\n\n{}", skill.name, skill.body)),
            None => {
                let known: Vec<String> =
                    self.source.list().into_iter().map(|(n, _)| n).collect();
                ToolOutput::err(format!(
                    "unknown skill '{name}'; available: {}",
                    known.join(", ")
                ))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;

    fn skill(name: &str, body: &str) -> Skill {
        Skill {
            name: name.to_string(),
            description: format!("{name} skill"),
            body: body.to_string(),
        }
    }

    fn call(name: &str) -> ToolUseBlock {
        ToolUseBlock {
            id: "s1".into(),
            name: "skill".into(),
            input: json!({"name": name}),
        }
    }

    #[tokio::test]
    async fn loads_skill_body() {
        let (_dir, ctx) = testutil::ctx();
        let source = StaticSkillSource::new(vec![skill("deploy", "run the deploy script")], vec![]);
        let tool = SkillTool::new(Arc::new(source));
        let out = tool.run(&call("deploy"), &ctx).await;
        assert!(!out.is_error);
        assert!(out.content.contains("run the deploy script"));
    }

    #[tokio::test]
    async fn project_scope_overrides_user_scope() {
        let (_dir, ctx) = testutil::ctx();
        let source = StaticSkillSource::new(
            vec![skill("deploy", "project body")],
            vec![skill("deploy", "user body")],
        );
        let tool = SkillTool::new(Arc::new(source));
        let out = tool.run(&call("deploy"), &ctx).await;
        assert!(out.content.contains("project body"));
    }

    #[tokio::test]
    async fn unknown_skill_lists_available() {
        let (_dir, ctx) = testutil::ctx();
        let source = StaticSkillSource::new(vec![skill("a", "x")], vec![skill("b", "y")]);
        let tool = SkillTool::new(Arc::new(source));
        let out = tool.run(&call("missing"), &ctx).await;
        assert!(out.is_error);
        assert!(out.content.contains("a, b"));
    }

    #[test]
    fn grant_entry_uses_skill_format() {
        let tool = SkillTool::new(Arc::new(StaticSkillSource::default()));
        assert_eq!(
            tool.grant_entry(&json!({"name": "deploy"})),
            Some("Skill(deploy)".to_string())
        );
    }
}
