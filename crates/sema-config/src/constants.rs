// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Maximum number of session transcript files kept under `~/.sema/history/`.
/// Oldest files beyond this count are pruned when a new session starts.
pub const HISTORY_FILES_RETAIN_COUNT: usize = 200;

/// Maximum number of transcript files retained per project working directory.
pub const PER_PROJECT_HISTORY_LENGTH_LIMIT: usize = 50;

/// Maximum number of projects tracked in `project.json`.  The least recently
/// used entry is evicted when the limit is exceeded.
pub const PROJECT_LENGTH_LIMIT: usize = 20;

/// Maximum number of user-input history entries kept per project.
pub const PROJECT_HISTORY_LENGTH_LIMIT: usize = 10;

/// Default shell command timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Hard ceiling on the shell command timeout a tool call may request.
pub const MAX_TIMEOUT_MS: u64 = 600_000;
