// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// The engine error taxonomy.  `Interrupted` is a dedicated kind — it is
/// never surfaced as `session:error` and always unwinds the turn to idle
/// with exactly one `session:interrupted` emission.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("interrupted by user")]
    Interrupted,

    #[error("model request failed: {0}")]
    Api(String),

    #[error("compaction failed: {0}")]
    Compact(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_distinguished() {
        assert!(EngineError::Interrupted.is_interrupt());
        assert!(!EngineError::Api("boom".into()).is_interrupt());
        assert!(!EngineError::Compact("x".into()).is_interrupt());
    }
}
