use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, warn};

use chatai_types::models::{ChatMessage, Model};

use crate::sse::{Frame, SseDecoder};
use crate::{ChatProvider, DeltaStream, LlmError};

pub const DEFAULT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Upper bound on body reads per completion. A runaway upstream is cut off
/// here instead of holding the request open forever.
pub const MAX_BODY_READS: usize = 1000;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: Model,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Streams completions from an OpenRouter-compatible endpoint.
#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenRouterClient {
    async fn stream_chat(&self, model: Model, messages: Vec<ChatMessage>) -> Result<DeltaStream, LlmError> {
        let response = self
            .http
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&CompletionRequest {
                model,
                messages: &messages,
                stream: true,
            })
            .send()
            .await
            .map_err(LlmError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Upstream stream opened for {} ({} messages)", model, messages.len());

        let mut body = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut reads = 0usize;

            while let Some(chunk) = body.next().await {
                reads += 1;
                if reads > MAX_BODY_READS {
                    warn!("Upstream exceeded {} reads, cutting the stream", MAX_BODY_READS);
                    break;
                }

                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(LlmError::Body(e));
                        return;
                    }
                };

                for frame in decoder.feed(&bytes) {
                    match frame {
                        Frame::Delta(text) => yield Ok(text),
                        Frame::Done => return,
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
