//! OpenAI-compatible chat completions backend.
//!
//! Works with any server implementing the streaming chat completions API:
//! - OpenAI (`https://api.openai.com`)
//! - Ollama (`http://localhost:11434`)
//! - vLLM, llama.cpp server, etc.

use super::prompt::{self, ChatMessage};
use super::sse::SseLineParser;
use super::{ConversationTurn, PartialResponse, ResponseStream};
use crate::config::RemoteConfig;
use crate::error::{ChatError, Result};
use crate::persona;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Raw content deltas from the server. `None` marks a chunk without text.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Option<String>>> + Send>>;

/// Client for a streaming chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api_url: String,
    api_model: String,
    api_key: Option<String>,
    api_key_env: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl ApiClient {
    /// Create a client from configuration.
    ///
    /// The API key comes from `api_key`, or from the `api_key_env` environment
    /// variable when that is empty. A missing key is only reported when a
    /// request is made.
    pub fn new(config: &RemoteConfig) -> Self {
        let api_key = if config.api_key.trim().is_empty() {
            std::env::var(&config.api_key_env)
                .ok()
                .filter(|key| !key.trim().is_empty())
        } else {
            Some(config.api_key.clone())
        };
        if api_key.is_none() {
            debug!("no API key found in config or ${}", config.api_key_env);
        }
        info!(
            "API backend configured: {} model={}",
            config.api_url, config.api_model
        );
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_model: config.api_model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        }
    }

    /// Model identifier sent with every request.
    pub fn model(&self) -> &str {
        &self.api_model
    }

    fn completions_url(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }

    /// Submit a streaming completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Authentication`] if no key is configured or the
    /// server rejects it, and [`ChatError::Request`] for other failures
    /// before the stream starts.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<DeltaStream> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ChatError::Authentication(format!(
                "no API key configured; set {} or remote.api_key",
                self.api_key_env
            ))
        })?;

        let body = CompletionRequest {
            model: &self.api_model,
            messages,
            stream: true,
        };
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Request(format!("API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }

        Ok(Box::pin(delta_stream(response.bytes_stream())))
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> ChatError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ChatError::Authentication(format!("API rejected credentials: {message}")),
        code => ChatError::Request(format!("API HTTP {code}: {message}")),
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Decode the text delta carried by one stream event.
///
/// # Errors
///
/// Returns [`ChatError::StreamInterrupted`] for malformed chunks and for
/// error payloads sent mid-stream.
pub fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::StreamInterrupted(format!("malformed stream chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(ChatError::StreamInterrupted(format!(
            "server error mid-stream: {}",
            error.message
        )));
    }
    Ok(chunk.choices.into_iter().next().and_then(|c| c.delta.content))
}

fn delta_stream<E>(
    bytes: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
) -> impl Stream<Item = Result<Option<String>>> + Send
where
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut parser = SseLineParser::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(ChatError::StreamInterrupted(format!("stream read error: {e}")));
                    return;
                }
            };
            for event in parser.push(&chunk) {
                if event.is_done() {
                    return;
                }
                yield parse_delta(&event.data);
            }
        }
        if let Some(event) = parser.flush() {
            if !event.is_done() {
                yield parse_delta(&event.data);
            }
        }
    }
}

/// Turn raw deltas into cumulative emissions.
///
/// Chunks without text are skipped. The first error is yielded and ends the
/// stream; everything emitted before it stands.
pub fn accumulate_content(
    deltas: impl Stream<Item = Result<Option<String>>> + Send + 'static,
) -> ResponseStream {
    Box::pin(async_stream::stream! {
        let gen_start = Instant::now();
        let mut deltas = Box::pin(deltas);
        let mut partial = PartialResponse::default();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(Some(text)) => {
                    if let Some(cumulative) = partial.push(&text) {
                        yield Ok(cumulative);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("API stream ended early after {} emissions: {e}", partial.emissions());
                    yield Err(e);
                    return;
                }
            }
        }
        info!(
            "API answer generated: {} emissions in {:.1}s",
            partial.emissions(),
            gen_start.elapsed().as_secs_f64()
        );
    })
}

/// Stream an answer from the remote API in the voice of `persona_name`.
///
/// # Errors
///
/// Fails before streaming with [`ChatError::UnknownPersona`],
/// [`ChatError::Authentication`] or [`ChatError::Request`].
pub async fn generate_remote(
    client: &ApiClient,
    message: &str,
    history: &[ConversationTurn],
    persona_name: &str,
) -> Result<ResponseStream> {
    let system_prompt = persona::get_context(persona_name)?;
    let messages = prompt::chat_messages(system_prompt, history, message);
    info!(
        "API generating answer as {persona_name} with {} ({} history turns)",
        client.model(),
        history.len()
    );
    let deltas = client.stream_chat(&messages).await?;
    Ok(accumulate_content(deltas))
}
