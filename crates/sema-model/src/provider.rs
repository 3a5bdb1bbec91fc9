// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{ModelRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The LLM adapter boundary.  The engine core never speaks a provider wire
/// protocol; embedders supply implementations of this trait and register
/// them under model profile names.  Cancellation is driven by the caller —
/// the agent loop drops the stream when its abort token fires.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn query(&self, req: ModelRequest) -> anyhow::Result<ResponseStream>;
}
