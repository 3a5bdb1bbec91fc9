// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod constants;
mod schema;
mod store;

pub use constants::*;
pub use schema::{AutoApprove, EngineConfig, ModelPointers, ModelProfile, ProjectConfig};
pub use store::{ModelsFile, ProjectsFile, SemaPaths, Store, TranscriptWriter};
