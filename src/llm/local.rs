//! Local-model backend.
//!
//! The conversation is rendered as a tagged transcript and handed to a
//! [`TextGenerator`] running on its own task. The generator pushes decoded text chunks into a bounded channel
//! which the returned stream drains, turning chunks into cumulative
//! emissions.
//!
//! Dropping the stream drops the receiving end of the channel; the generator
//! stops at its next send. If no chunk arrives within
//! [`GenerationConfig::token_timeout`] the stream ends with
//! [`ChatError::GenerationTimeout`].

use super::prompt::{self, TAG_OPEN};
use super::{ConversationTurn, PartialResponse, ResponseStream};
use crate::config::GenerationConfig;
use crate::error::{ChatError, Result};
use crate::persona;
use async_trait::async_trait;
use mistralrs::{Model, RequestBuilder, Response, TextMessageRole, TextMessages};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Loaded local model able to stream text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier of the loaded weights (HuggingFace repo ID).
    fn model_id(&self) -> &str;

    /// Continue `transcript`, sending each decoded chunk to `tx`.
    ///
    /// Returns once generation finishes or `tx` is closed by the consumer.
    async fn generate(
        &self,
        transcript: String,
        params: GenerationConfig,
        tx: mpsc::Sender<String>,
    ) -> Result<()>;
}

/// Stream an answer from a local model in the voice of `persona_name`.
///
/// Generation starts on a background task when the stream is first polled.
/// Bare `<` chunks are dropped so a stray tag opener never reaches the answer.
///
/// # Errors
///
/// Fails before streaming with [`ChatError::UnknownPersona`]. Inference failures and [`ChatError::GenerationTimeout`] are yielded
/// as the final stream item.
pub fn generate_local(
    message: &str,
    history: &[ConversationTurn],
    persona_name: &str,
    model: Arc<dyn TextGenerator>,
    params: &GenerationConfig,
) -> Result<ResponseStream> {
    let system_prompt = persona::get_context(persona_name)?;
    let text = prompt::render_transcript(system_prompt, history, message);
    debug!("rendered transcript of {} bytes", text.len());

    let params = params.clone();
    let timeout = params.token_timeout();
    let capacity = params.channel_capacity.max(1);

    Ok(Box::pin(async_stream::stream! {
        let (tx, mut rx) = mpsc::channel::<String>(capacity);
        let worker_model = Arc::clone(&model);
        let worker = tokio::spawn(async move { worker_model.generate(text, params, tx).await });

        info!("started generating text with {}", model.model_id());
        let gen_start = Instant::now();
        let mut partial = PartialResponse::default();
        let mut chunk_count: usize = 0;

        loop {
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(chunk)) => {
                    chunk_count += 1;
                    if chunk == TAG_OPEN {
                        continue;
                    }
                    if let Some(cumulative) = partial.push(&chunk) {
                        yield Ok(cumulative);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "no token from {} for {}ms after {chunk_count} chunks, giving up",
                        model.model_id(),
                        timeout.as_millis()
                    );
                    yield Err(ChatError::GenerationTimeout(timeout));
                    return;
                }
            }
        }

        match worker.await {
            Ok(Ok(())) => {
                info!(
                    "answer generated: {chunk_count} chunks in {:.1}s",
                    gen_start.elapsed().as_secs_f64()
                );
            }
            Ok(Err(e)) => {
                yield Err(e);
            }
            Err(e) => {
                yield Err(ChatError::Llm(format!("generation task failed: {e}")));
            }
        }
    }))
}

/// [`TextGenerator`] backed by a mistral.rs model.
///
/// Tokenization happens inside mistral.rs with the tokenizer shipped in the
/// model repo.
pub struct MistralGenerator {
    model: Arc<Model>,
    model_id: String,
}

impl MistralGenerator {
    pub fn new(model: Arc<Model>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
        }
    }
}

fn build_request(transcript: &str, params: &GenerationConfig) -> RequestBuilder {
    let messages = TextMessages::new().add_message(TextMessageRole::User, transcript);
    let mut request = RequestBuilder::from(messages);
    if params.do_sample {
        request = request
            .set_sampler_temperature(params.temperature)
            .set_sampler_topp(params.top_p)
            .set_sampler_topk(params.top_k);
    } else {
        request = request.set_deterministic_sampler();
    }
    request.set_sampler_max_len(params.max_new_tokens)
}

#[async_trait]
impl TextGenerator for MistralGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        transcript: String,
        params: GenerationConfig,
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        if params.num_beams > 1 {
            warn!(
                "num_beams={} requested but the local engine samples a single sequence",
                params.num_beams
            );
        }
        debug!("max_new_tokens={}", params.max_new_tokens);

        let request = build_request(&transcript, &params);
        let mut stream = self
            .model
            .stream_chat_request(request)
            .await
            .map_err(|e| ChatError::Llm(format!("stream request failed: {e}")))?;

        while let Some(response) = stream.next().await {
            match response {
                Response::Chunk(chunk) => {
                    let Some(content) = chunk
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                    else {
                        continue;
                    };
                    if content.is_empty() {
                        continue;
                    }
                    if tx.send(content).await.is_err() {
                        debug!("stream consumer dropped, stopping generation");
                        return Ok(());
                    }
                }
                Response::Done(_) => break,
                Response::ModelError(msg, _) => {
                    return Err(ChatError::Llm(format!("model error: {msg}")));
                }
                Response::InternalError(e) => {
                    return Err(ChatError::Llm(format!("internal error: {e}")));
                }
                Response::ValidationError(e) => {
                    return Err(ChatError::Llm(format!("validation error: {e}")));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Emits a fixed list of chunks and records the prompt it received.
    struct ScriptedGenerator {
        chunks: Vec<&'static str>,
        seen_prompt: Mutex<Option<String>>,
    }

    impl ScriptedGenerator {
        fn new(chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                chunks,
                seen_prompt: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_id(&self) -> &str {
            "test/scripted"
        }

        async fn generate(
            &self,
            transcript: String,
            _params: GenerationConfig,
            tx: mpsc::Sender<String>,
        ) -> Result<()> {
            *self.seen_prompt.lock().unwrap() = Some(transcript);
            for chunk in &self.chunks {
                if tx.send((*chunk).to_owned()).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    /// Sends one chunk, then never sends again while holding the channel open.
    struct StallingGenerator;

    #[async_trait]
    impl TextGenerator for StallingGenerator {
        fn model_id(&self) -> &str {
            "test/stalling"
        }

        async fn generate(
            &self,
            _transcript: String,
            _params: GenerationConfig,
            tx: mpsc::Sender<String>,
        ) -> Result<()> {
            let _ = tx.send("Je".to_owned()).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(tx);
            Ok(())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        fn model_id(&self) -> &str {
            "test/failing"
        }

        async fn generate(
            &self,
            _transcript: String,
            _params: GenerationConfig,
            tx: mpsc::Sender<String>,
        ) -> Result<()> {
            let _ = tx.send("partial".to_owned()).await;
            Err(ChatError::Llm("out of memory".to_owned()))
        }
    }

    fn fast_params() -> GenerationConfig {
        GenerationConfig {
            token_timeout_ms: 100,
            channel_capacity: 4,
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn emissions_are_cumulative_and_skip_bare_tag_opener() {
        let generator = ScriptedGenerator::new(vec!["Bon", "jour", "<", ", ", "cher", "<"]);
        let stream = generate_local(
            "Hello",
            &[ConversationTurn::new("q1", "a1")],
            "Sigmund Freud",
            generator.clone(),
            &fast_params(),
        )
        .unwrap();
        let emissions: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(emissions, vec!["Bon", "Bonjour", "Bonjour, ", "Bonjour, cher"]);

        let seen = generator.seen_prompt.lock().unwrap().clone().unwrap();
        assert!(seen.starts_with("<system>:You are Sigmund Freud"));
        assert!(seen.contains("<human>:q1\n<bot>:a1\n"));
        assert!(seen.ends_with("<human>:Hello\n<bot>:"));
    }

    #[tokio::test]
    async fn tag_opener_inside_a_chunk_is_kept() {
        let generator = ScriptedGenerator::new(vec!["a <b", "<"]);
        let stream =
            generate_local("m", &[], "Andrei Green", generator, &fast_params()).unwrap();
        let emissions: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(emissions, vec!["a <b"]);
    }

    #[tokio::test]
    async fn silent_channel_times_out() {
        let stream = generate_local(
            "Hello",
            &[],
            "Sigmund Freud",
            Arc::new(StallingGenerator),
            &fast_params(),
        )
        .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "Je");
        assert!(matches!(
            items[1],
            Err(ChatError::GenerationTimeout(d)) if d == Duration::from_millis(100)
        ));
    }

    #[tokio::test]
    async fn generator_error_is_final_item() {
        let stream = generate_local(
            "Hello",
            &[],
            "Sigmund Freud",
            Arc::new(FailingGenerator),
            &fast_params(),
        )
        .unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert!(matches!(items[1], Err(ChatError::Llm(ref m)) if m == "out of memory"));
    }

    #[tokio::test]
    async fn unknown_persona_fails_before_generation() {
        let generator = ScriptedGenerator::new(vec!["x"]);
        let result = generate_local("m", &[], "nobody", generator.clone(), &fast_params());
        assert!(matches!(result, Err(ChatError::UnknownPersona(_))));
        assert!(generator.seen_prompt.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_can_be_abandoned_early() {
        let generator = ScriptedGenerator::new(vec!["a"; 100]);
        let mut stream = generate_local(
            "m",
            &[],
            "Sigmund Freud",
            generator,
            &GenerationConfig {
                channel_capacity: 1,
                ..fast_params()
            },
        )
        .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        drop(stream);
    }
}
