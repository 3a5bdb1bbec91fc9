// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sema_model::ToolUseBlock;
use sema_runtime::{AskQuestionPayload, EngineEvent, QuestionSpec};

use crate::tool::{Tool, ToolContext, ToolOutput};

/// Ask the user one or more structured multiple-choice questions and block
/// until the UI answers over the bus, or the turn is aborted.
///
/// Multi-select answers arrive as one string per question with the selected
/// labels joined by `", "`; labels containing commas are not escaped — the
/// UI owns label hygiene.
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn name(&self) -> &str {
        "ask_question"
    }

    fn description(&self) -> &str {
        "Present structured multiple-choice questions to the user and collect answers.\n\
         Each question: prompt, options (≥2), allow_multiple (default false).\n\
         Use for decisions that need an explicit choice; for yes/no just ask in text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "description": "1-3 questions to ask",
                    "items": {
                        "type": "object",
                        "properties": {
                            "prompt": { "type": "string", "description": "The question" },
                            "options": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "At least two choices"
                            },
                            "allow_multiple": {
                                "type": "boolean",
                                "description": "Whether several options may be selected (default false)"
                            }
                        },
                        "required": ["prompt", "options"]
                    }
                }
            },
            "required": ["questions"]
        })
    }

    fn is_read_only(&self) -> bool {
        // Pure rendezvous with the UI; no world mutation.
        true
    }

    async fn run(&self, call: &ToolUseBlock, ctx: &ToolContext) -> ToolOutput {
        let raw = match call.input.get("questions").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err("missing 'questions' array"),
        };

        let mut questions: Vec<QuestionSpec> = Vec::with_capacity(raw.len());
        for (i, q) in raw.iter().enumerate() {
            let prompt = match q.get("prompt").and_then(|v| v.as_str()) {
                Some(p) => p.to_string(),
                None => return ToolOutput::err(format!("question {} missing 'prompt'", i + 1)),
            };
            let options: Vec<String> = q
                .get("options")
                .and_then(|v| v.as_array())
                .map(|opts| {
                    opts.iter()
                        .filter_map(|o| o.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if options.len() < 2 {
                return ToolOutput::err(format!("question {} needs at least 2 options", i + 1));
            }
            questions.push(QuestionSpec {
                prompt,
                options,
                allow_multiple: q
                    .get("allow_multiple")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            });
        }

        debug!(count = questions.len(), agent = %ctx.agent_id, "ask_question tool");

        // Arm the waiter before emitting so a UI that answers synchronously
        // during the request delivery is not missed.
        let agent_id = ctx.agent_id.clone();
        let waiter = ctx.bus.waiter("ask:question:response", move |ev| {
            matches!(
                ev,
                EngineEvent::AskQuestionResponse { agent_id: a, .. } if a == &agent_id
            )
        });
        ctx.bus.emit(EngineEvent::AskQuestionRequest(AskQuestionPayload {
            agent_id: ctx.agent_id.clone(),
            questions: questions.clone(),
        }));
        let response = waiter.wait(&ctx.abort).await;

        match response {
            Some(EngineEvent::AskQuestionResponse { answers, .. }) => {
                let mut lines = Vec::with_capacity(questions.len());
                for (i, q) in questions.iter().enumerate() {
                    let answer = answers.get(i).map(String::as_str).unwrap_or("(no answer)");
                    lines.push(format!("{}\nAnswer: {answer}", q.prompt));
                }
                ToolOutput::ok(lines.join("\n\n"))
            }
            _ => ToolOutput::err("interrupted while waiting for the user's answer"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::builtin::testutil;
    use sema_runtime::AgentId;

    fn call(args: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: "q1".into(),
            name: "ask_question".into(),
            input: args,
        }
    }

    #[tokio::test]
    async fn returns_answer_for_matching_agent() {
        let (_dir, ctx) = testutil::ctx();
        let bus = Arc::clone(&ctx.bus);
        // Answer as soon as the request is seen.
        bus.on("ask:question:request", {
            let bus = Arc::clone(&bus);
            move |ev| {
                if let EngineEvent::AskQuestionRequest(req) = ev {
                    bus.emit(EngineEvent::AskQuestionResponse {
                        agent_id: req.agent_id.clone(),
                        answers: vec!["red, blue".to_string()],
                    });
                }
            }
        });
        let out = AskQuestionTool
            .run(
                &call(json!({"questions": [
                    {"prompt": "Pick colors", "options": ["red", "blue", "green"], "allow_multiple": true}
                ]})),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("Answer: red, blue"));
    }

    #[tokio::test]
    async fn ignores_response_for_other_agent() {
        let (_dir, ctx) = testutil::ctx();
        let bus = Arc::clone(&ctx.bus);
        bus.on("ask:question:request", {
            let bus = Arc::clone(&bus);
            move |_| {
                // Wrong agent first, then the right one.
                bus.emit(EngineEvent::AskQuestionResponse {
                    agent_id: AgentId::sub(),
                    answers: vec!["wrong".to_string()],
                });
                bus.emit(EngineEvent::AskQuestionResponse {
                    agent_id: AgentId::main(),
                    answers: vec!["right".to_string()],
                });
            }
        });
        let out = AskQuestionTool
            .run(
                &call(json!({"questions": [
                    {"prompt": "Q", "options": ["a", "b"]}
                ]})),
                &ctx,
            )
            .await;
        assert!(out.content.contains("Answer: right"));
    }

    #[tokio::test]
    async fn abort_unblocks_with_error() {
        let (_dir, ctx) = testutil::ctx();
        ctx.abort.cancel();
        let out = AskQuestionTool
            .run(
                &call(json!({"questions": [
                    {"prompt": "Q", "options": ["a", "b"]}
                ]})),
                &ctx,
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("interrupted"));
    }

    #[tokio::test]
    async fn fewer_than_two_options_is_error() {
        let (_dir, ctx) = testutil::ctx();
        let out = AskQuestionTool
            .run(
                &call(json!({"questions": [{"prompt": "Q", "options": ["only"]}]})),
                &ctx,
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at least 2"));
    }
}
