// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;

use crate::tool::{PermissionKind, Tool, ToolContext, ToolOutput};

/// One tool advertised by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of one MCP tool invocation.
#[derive(Debug, Clone)]
pub struct McpCallResult {
    pub content: String,
    pub is_error: bool,
}

/// The MCP transport boundary.  Transports (stdio, sse, http) live outside
/// this repo; the engine consumes connected clients through this trait and
/// adapts their tools into the registry.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Server name used in the `mcp__<server>_<tool>` namespace.
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolSpec>>;

    async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<McpCallResult>;
}

/// Adapter presenting one external MCP tool through the uniform [`Tool`]
/// interface.
pub struct McpTool {
    client: Arc<dyn McpClient>,
    spec: McpToolSpec,
    namespaced: String,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, spec: McpToolSpec) -> Self {
        let namespaced = format!("mcp__{}_{}", client.server_name(), spec.name);
        Self {
            client,
            spec,
            namespaced,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.namespaced
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn input_schema(&self) -> Value {
        if self.spec.input_schema.is_object() {
            self.spec.input_schema.clone()
        } else {
            json!({"type": "object", "properties": {}, "required": []})
        }
    }

    fn is_read_only(&self) -> bool {
        // External tools declare nothing about their effects; treat all of
        // them as mutating so they go through the gate and run serially.
        false
    }

    fn permission_kind(&self) -> Option<PermissionKind> {
        Some(PermissionKind::McpTool)
    }

    fn permission_title(&self, _input: &Value) -> String {
        format!("External tool: {}", self.namespaced)
    }

    fn grant_entry(&self, _input: &Value) -> Option<String> {
        Some(self.namespaced.clone())
    }

    async fn run(&self, call: &ToolUseBlock, _ctx: &ToolContext) -> ToolOutput {
        debug!(tool = %self.namespaced, "calling external tool");
        match self
            .client
            .call_tool(&self.spec.name, call.input.clone())
            .await
        {
            Ok(result) if result.is_error => ToolOutput::err(result.content),
            Ok(result) => ToolOutput::ok(result.content),
            Err(e) => ToolOutput::err(format!("external tool error: {e}")),
        }
    }
}

/// List a connected client's tools and wrap each in an [`McpTool`].
pub async fn adapt_mcp_client(client: Arc<dyn McpClient>) -> anyhow::Result<Vec<McpTool>> {
    let specs = client.list_tools().await?;
    Ok(specs
        .into_iter()
        .map(|spec| McpTool::new(Arc::clone(&client), spec))
        .collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient;

    #[async_trait]
    impl McpClient for FakeClient {
        fn server_name(&self) -> &str {
            "files"
        }

        async fn list_tools(&self) -> anyhow::Result<Vec<McpToolSpec>> {
            Ok(vec![McpToolSpec {
                name: "stat".into(),
                description: "stat a path".into(),
                input_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
            }])
        }

        async fn call_tool(&self, name: &str, args: Value) -> anyhow::Result<McpCallResult> {
            Ok(McpCallResult {
                content: format!("{name}:{}", args["path"].as_str().unwrap_or("?")),
                is_error: false,
            })
        }
    }

    #[tokio::test]
    async fn adapted_tools_are_namespaced() {
        let tools = adapt_mcp_client(Arc::new(FakeClient)).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "mcp__files_stat");
        assert_eq!(
            tools[0].grant_entry(&json!({})),
            Some("mcp__files_stat".to_string())
        );
    }

    #[tokio::test]
    async fn run_forwards_to_client() {
        let tools = adapt_mcp_client(Arc::new(FakeClient)).await.unwrap();
        let call = ToolUseBlock {
            id: "t1".into(),
            name: "mcp__files_stat".into(),
            input: json!({"path": "/tmp"}),
        };
        let ctx = crate::tool::ToolContext {
            agent_id: sema_runtime::AgentId::main(),
            registry: Arc::new(sema_runtime::AgentRegistry::new(Arc::new(
                sema_runtime::EventBus::new(),
            ))),
            bus: Arc::new(sema_runtime::EventBus::new()),
            abort: tokio_util::sync::CancellationToken::new(),
            working_dir: "/tmp".into(),
        };
        let out = tools[0].run(&call, &ctx).await;
        assert_eq!(out.result_for_assistant, "stat:/tmp");
    }
}
