// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bus;
mod events;
pub mod signals;
mod state;

pub use bus::{EventBus, EventWaiter, SubscriptionId};
pub use events::{
    AskQuestionPayload, DiffKind, EngineEvent, PermissionContent, QuestionSpec, SessionErrorKind,
};
pub use state::{AgentId, AgentRegistry, AgentState, RunState, TodoItem, TodoStatus};
