// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use sema_model::{
    AssistantTurn, ContentBlock, ModelProvider, ModelRequest, ResponseEvent, Turn, UserContent,
};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Prompt for the `quick` model when compressing old history.
pub const COMPACT_PROMPT: &str = "You are a context compaction assistant for a software \
engineering agent. Summarise the conversation history below in a concise, \
information-dense way. Preserve file paths, function names, error messages, code \
snippets, decisions and their rationale, and every unfinished task. The summary \
replaces the original history, so include everything the agent needs to continue \
correctly.";

/// chars/4 estimate over the full history.
pub fn estimate_tokens(history: &[Turn]) -> usize {
    history.iter().map(Turn::approx_tokens).sum()
}

/// Outcome of a successful compaction.
#[derive(Debug)]
pub struct Compacted {
    pub history: Vec<Turn>,
    pub token_before: usize,
    pub token_after: usize,
}

/// Summarize everything but the most recent `keep_recent` turns into a
/// single assistant summary turn using the `quick` model.
///
/// Returns the original history untouched when there is nothing to compact.
/// Failures leave the caller's history unchanged — the error carries the
/// reason and the caller decides whether the turn continues.
pub async fn compact_history(
    history: &[Turn],
    quick_model: &Arc<dyn ModelProvider>,
    keep_recent: usize,
    abort: &CancellationToken,
) -> Result<Compacted, EngineError> {
    if history.is_empty() {
        return Ok(Compacted {
            history: Vec::new(),
            token_before: 0,
            token_after: 0,
        });
    }

    let token_before = estimate_tokens(history);
    let mut split = history.len().saturating_sub(keep_recent);

    // Never split inside a tool interaction: a retained tail starting with a
    // tool-result user turn would reference tool-use ids that were
    // summarised away.
    while split > 0 && split < history.len() && starts_tool_interaction_tail(&history[split]) {
        split -= 1;
    }
    if split == 0 {
        debug!("nothing to compact before the retained tail");
        return Ok(Compacted {
            history: history.to_vec(),
            token_before,
            token_after: token_before,
        });
    }

    let (old, tail) = history.split_at(split);
    let request = ModelRequest {
        system: None,
        messages: vec![Turn::user(format!(
            "{COMPACT_PROMPT}\n\n---\n\n{}",
            serialize_history(old)
        ))],
        tools: vec![],
    };

    let mut stream = quick_model
        .query(request)
        .await
        .map_err(|e| EngineError::Compact(e.to_string()))?;

    let mut summary = String::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(EngineError::Interrupted),
            ev = stream.next() => ev,
        };
        match event {
            None => break,
            Some(Err(e)) => return Err(EngineError::Compact(e.to_string())),
            Some(Ok(ResponseEvent::TextDelta(delta))) => summary.push_str(&delta),
            Some(Ok(ResponseEvent::Done)) => break,
            Some(Ok(ResponseEvent::Error(e))) => {
                warn!(error = %e, "compaction stream warning");
            }
            Some(Ok(_)) => {}
        }
    }

    if summary.trim().is_empty() {
        return Err(EngineError::Compact("empty summary".to_string()));
    }

    let mut compacted = Vec::with_capacity(tail.len() + 1);
    compacted.push(Turn::Assistant(AssistantTurn {
        blocks: vec![ContentBlock::text(format!(
            "Context summary of the earlier conversation:\n\n{summary}"
        ))],
        duration_ms: 0,
    }));
    compacted.extend_from_slice(tail);

    let token_after = estimate_tokens(&compacted);
    debug!(token_before, token_after, "history compacted");
    Ok(Compacted {
        history: compacted,
        token_before,
        token_after,
    })
}

/// True when a turn must stay attached to the turn before it: a user turn
/// carrying tool results belongs to the assistant tool-use turn above, so a
/// retained tail may not begin with it.
fn starts_tool_interaction_tail(turn: &Turn) -> bool {
    match turn {
        Turn::User(u) => matches!(u.content, UserContent::Blocks(_)),
        Turn::Assistant(_) => false,
    }
}

/// Plain-text rendering of turns for the compaction prompt.
fn serialize_history(history: &[Turn]) -> String {
    let mut out = String::new();
    for turn in history {
        match turn {
            Turn::User(u) => match &u.content {
                UserContent::Text(t) => {
                    out.push_str("[user]\n");
                    out.push_str(t);
                }
                UserContent::Blocks(blocks) => {
                    out.push_str("[tool results]\n");
                    for b in blocks {
                        match b {
                            sema_model::UserBlock::Text { text } => out.push_str(text),
                            sema_model::UserBlock::ToolResult(tr) => {
                                out.push_str(&format!("({}) {}\n", tr.tool_use_id, tr.content));
                            }
                        }
                    }
                }
            },
            Turn::Assistant(a) => {
                out.push_str("[assistant]\n");
                out.push_str(&a.text_content());
                for tu in a.tool_uses() {
                    out.push_str(&format!("\n(tool call {} {})", tu.name, tu.input));
                }
            }
        }
        out.push_str("\n\n");
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sema_model::ScriptedMockProvider;

    fn chat(n: usize) -> Vec<Turn> {
        let mut h = Vec::new();
        for i in 0..n {
            h.push(Turn::user(format!("question {i}")));
            h.push(Turn::assistant(format!("answer {i}")));
        }
        h
    }

    #[tokio::test]
    async fn empty_history_is_unchanged() {
        let quick: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("sum"));
        let out = compact_history(&[], &quick, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.history.is_empty());
    }

    #[tokio::test]
    async fn old_turns_are_replaced_by_summary() {
        let quick: Arc<dyn ModelProvider> =
            Arc::new(ScriptedMockProvider::always_text("the gist of it"));
        let history = chat(5);
        let out = compact_history(&history, &quick, 2, &CancellationToken::new())
            .await
            .unwrap();
        // summary turn + retained tail
        assert_eq!(out.history.len(), 1 + 2);
        match &out.history[0] {
            Turn::Assistant(a) => assert!(a.text_content().contains("the gist of it")),
            other => panic!("expected summary assistant turn, got {other:?}"),
        }
        assert!(out.token_before > 0);
    }

    #[tokio::test]
    async fn tail_boundary_avoids_tool_result_turns() {
        let mut history = chat(3);
        // The final pair is an assistant tool-use turn plus its results; a
        // keep_recent of 1 would otherwise split between them.
        history.push(Turn::Assistant(AssistantTurn {
            blocks: vec![ContentBlock::ToolUse(sema_model::ToolUseBlock {
                id: "t1".into(),
                name: "read_file".into(),
                input: serde_json::json!({"path": "a"}),
            })],
            duration_ms: 0,
        }));
        history.push(Turn::User(sema_model::UserTurn::tool_results(
            vec![sema_model::ToolResultBlock {
                tool_use_id: "t1".into(),
                content: "ok".into(),
                is_error: false,
            }],
            None,
        )));
        let quick: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("s"));
        let out = compact_history(&history, &quick, 1, &CancellationToken::new())
            .await
            .unwrap();
        // The retained tail must not begin with a tool-result user turn.
        match &out.history[1] {
            Turn::User(u) => assert!(matches!(u.content, UserContent::Text(_))),
            Turn::Assistant(a) => assert!(!a.tool_uses().is_empty() || !a.blocks.is_empty()),
        }
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let quick: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::new(vec![vec![
            sema_model::ResponseEvent::Done,
        ]]));
        let err = compact_history(&chat(5), &quick, 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Compact(_)));
    }

    #[tokio::test]
    async fn abort_interrupts_compaction() {
        let quick: Arc<dyn ModelProvider> = Arc::new(ScriptedMockProvider::always_text("s"));
        let abort = CancellationToken::new();
        abort.cancel();
        let err = compact_history(&chat(5), &quick, 1, &abort).await.unwrap_err();
        assert!(err.is_interrupt());
    }

    #[test]
    fn estimate_counts_all_turns() {
        let h = chat(2);
        assert!(estimate_tokens(&h) >= 4);
    }
}
