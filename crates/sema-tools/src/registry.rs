// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use sema_model::ToolSchema;

use crate::tool::Tool;

/// Central registry holding all tools available to a session.  Immutable
/// after construction; the scheduler resolves tools by name and sub-agents
/// get name-filtered views.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, used for stable schema listings.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Tool-definition schemas for the LLM request, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    /// A registry restricted to `names`, preserving order.  `None` keeps
    /// everything.  Used by the sub-agent runner's per-config tool list.
    pub fn filtered(&self, names: Option<&[String]>) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for name in &self.order {
            let keep = match names {
                Some(allow) => allow.iter().any(|n| n == name),
                None => true,
            };
            if keep {
                if let Some(tool) = self.tools.get(name) {
                    out.register_arc(Arc::clone(tool));
                }
            }
        }
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{Tool, ToolContext, ToolOutput};
    use sema_model::ToolUseBlock;

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn run(&self, call: &ToolUseBlock, _ctx: &ToolContext) -> ToolOutput {
            ToolOutput::ok(format!("echo:{}", call.input))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn schemas_preserve_registration_order() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "b" });
        reg.register(EchoTool { name: "a" });
        let names: Vec<String> = reg.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn filtered_restricts_to_allowed_names() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        let sub = reg.filtered(Some(&["b".to_string()]));
        assert_eq!(sub.names(), vec!["b"]);
        let all = reg.filtered(None);
        assert_eq!(all.names().len(), 2);
    }

    #[test]
    fn reregistering_same_name_overwrites_without_duplicating() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names(), vec!["t"]);
    }
}
