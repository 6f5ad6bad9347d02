//! Client side of the upstream chat-completion API.
//!
//! The upstream streams its answer as Server-Sent Events. [`sse::SseDecoder`]
//! turns raw body bytes into text deltas and [`openrouter::OpenRouterClient`]
//! drives an HTTP request through it. Handlers only see the
//! [`ChatProvider`] trait, so they can be exercised without a network.

pub mod openrouter;
pub mod sse;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use chatai_types::models::{ChatMessage, Model};

pub use openrouter::OpenRouterClient;

/// Stream of text deltas produced by one completion request.
pub type DeltaStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("upstream request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream stream broke: {0}")]
    Body(#[source] reqwest::Error),
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Start a streaming completion. The request is sent and the response
    /// status checked before this returns; the deltas follow on the stream.
    async fn stream_chat(&self, model: Model, messages: Vec<ChatMessage>) -> Result<DeltaStream, LlmError>;
}
