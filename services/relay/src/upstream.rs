//! Upstream Completion Client
//!
//! Opens a streamed chat completion against an OpenAI-compatible provider and
//! hands back the raw SSE body. Transcoding happens in [`crate::relay`].

use crate::config::Config;
use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream::BoxStream};
use tracing::{debug, instrument, warn};

/// Raw upstream response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("OPENROUTER_API_KEY not configured")]
    MissingCredential,
    #[error("Upstream {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("Failed to build upstream request: {0}")]
    Request(#[from] OpenAIError),
}

/// A provider that can stream a completion for a single user prompt.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn stream_completion(&self, prompt: &str) -> Result<ByteStream, UpstreamError>;
}

/// Client for OpenRouter or any other OpenAI-compatible chat endpoint.
pub struct OpenRouterClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.upstream_url.clone(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            max_tokens: config.max_tokens,
            referer: config.app_referer.clone(),
            title: config.app_title.clone(),
        }
    }

    /// Single user message, operator-chosen model, streaming on.
    #[allow(deprecated)]
    fn build_request(&self, prompt: &str) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(self.max_tokens)
            .stream(true)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
    }
}

#[async_trait]
impl UpstreamClient for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn stream_completion(&self, prompt: &str) -> Result<ByteStream, UpstreamError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(UpstreamError::MissingCredential)?;
        let request = self.build_request(prompt)?;

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "Upstream rejected request");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("Upstream stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::Transport(e.to_string())))
            .boxed())
    }
}
