//! Every backend emits cumulative text: each item extends the previous one.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use freudgpt::config::{AppConfig, GenerationConfig};
use freudgpt::llm::TextGenerator;
use freudgpt::loader::{LocalModelFactory, Precision};
use freudgpt::{ChatEngine, ResponseStream, Result};
use futures_util::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

struct WordGenerator;

#[async_trait]
impl TextGenerator for WordGenerator {
    fn model_id(&self) -> &str {
        "test/words"
    }

    async fn generate(
        &self,
        _transcript: String,
        _params: GenerationConfig,
        tx: mpsc::Sender<String>,
    ) -> Result<()> {
        for word in ["Le ", "<", "moi ", "n'est ", "pas ", "maître"] {
            if tx.send(word.to_owned()).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

struct WordFactory;

#[async_trait]
impl LocalModelFactory for WordFactory {
    async fn load(
        &self,
        _repo_id: &str,
        _precision: Precision,
        _cache_dir: &Path,
    ) -> Result<Arc<dyn TextGenerator>> {
        Ok(Arc::new(WordGenerator))
    }
}

fn assert_cumulative(items: &[String]) {
    assert!(!items.is_empty());
    for pair in items.windows(2) {
        assert!(
            pair[1].starts_with(&pair[0]) && pair[1].len() > pair[0].len(),
            "{:?} does not extend {:?}",
            pair[1],
            pair[0]
        );
    }
}

async fn drain(stream: ResponseStream) -> Vec<String> {
    stream.map(|item| item.unwrap()).collect().await
}

#[tokio::test]
async fn stub_and_local_backends_emit_cumulative_text() {
    let mut config = AppConfig::default();
    config.chat.parrot_delay_ms = 0;
    let engine = ChatEngine::with_factory(config, Arc::new(WordFactory));

    let parrot = drain(
        engine
            .predict("Was will das Weib?", &[], "Sigmund Freud", "parrot-test")
            .await
            .unwrap(),
    )
    .await;
    assert_cumulative(&parrot);

    engine.load_model("mistral7b-instruct").await.unwrap();
    let local = drain(
        engine
            .predict("Qu'est-ce que le moi ?", &[], "Sigmund Freud", "mistral7b-instruct")
            .await
            .unwrap(),
    )
    .await;
    assert_cumulative(&local);
    assert_eq!(local.last().map(String::as_str), Some("Le moi n'est pas maître"));
}
