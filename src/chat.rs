//! Chat orchestration.
//!
//! [`ChatEngine`] ties the persona registry, the model catalog, the model
//! slot and the three generation backends together behind one `predict`
//! call.

use crate::backend::BackendKind;
use crate::config::AppConfig;
use crate::error::{ChatError, Result};
use crate::llm::{self, ApiClient, ConversationTurn, ResponseStream};
use crate::loader::{LocalModelFactory, MistralFactory, ModelHandle, ModelLoader};
use crate::persona;
use crate::stt::PendingAudioQuestion;
use std::sync::Arc;
use tracing::{debug, info};

/// Dispatches chat turns to the right backend.
pub struct ChatEngine {
    config: AppConfig,
    loader: ModelLoader,
    api: ApiClient,
    pending_audio: PendingAudioQuestion,
}

impl ChatEngine {
    /// Create an engine that loads local models with mistral.rs.
    pub fn new(config: AppConfig) -> Self {
        Self::with_factory(config, Arc::new(MistralFactory))
    }

    /// Create an engine with a custom local model factory.
    pub fn with_factory(config: AppConfig, factory: Arc<dyn LocalModelFactory>) -> Self {
        let loader = ModelLoader::new(config.models.clone(), factory);
        let api = ApiClient::new(&config.remote);
        Self {
            config,
            loader,
            api,
            pending_audio: PendingAudioQuestion::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Slot that spoken questions are transcribed into.
    pub fn pending_audio(&self) -> &PendingAudioQuestion {
        &self.pending_audio
    }

    /// Make `model_name` the current model, releasing the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub async fn load_model(&self, model_name: &str) -> Result<ModelHandle> {
        self.loader.load(model_name).await
    }

    /// Name of the currently loaded model, if any.
    pub async fn current_model(&self) -> Option<String> {
        self.loader
            .slot()
            .current()
            .await
            .map(|h| h.model_name().to_owned())
    }

    /// Stream the answer to `message` as `persona_name` using `model_name`.
    ///
    /// A pending transcribed question replaces `message` for this one turn.
    /// Every item of the returned stream is the whole answer so far.
    ///
    /// # Errors
    ///
    /// Fails before streaming with [`ChatError::UnknownPersona`],
    /// [`ChatError::ModelNotLoaded`] for a local model that is not the
    /// current one, or a remote request error.
    pub async fn predict(
        &self,
        message: &str,
        history: &[ConversationTurn],
        persona_name: &str,
        model_name: &str,
    ) -> Result<ResponseStream> {
        let message = match self.pending_audio.take() {
            Some(spoken) => {
                info!("answering transcribed question instead of typed input");
                spoken
            }
            None => message.to_owned(),
        };
        persona::get_context(persona_name)?;

        let entry = self.config.models.resolve(model_name);
        debug!(
            "predict persona={persona_name} model={model_name} backend={}",
            entry.backend
        );
        match entry.backend {
            BackendKind::Stub => Ok(llm::parrot::generate_parrot(
                &message,
                persona_name,
                self.config.chat.parrot_delay(),
            )),
            BackendKind::LocalModel => {
                let generator = self
                    .loader
                    .slot()
                    .current()
                    .await
                    .filter(|h| h.model_name() == model_name)
                    .and_then(|h| h.generator())
                    .ok_or_else(|| ChatError::ModelNotLoaded(model_name.to_owned()))?;
                llm::local::generate_local(
                    &message,
                    history,
                    persona_name,
                    generator,
                    &self.config.generation,
                )
            }
            BackendKind::RemoteApi => {
                llm::api::generate_remote(&self.api, &message, history, persona_name).await
            }
        }
    }
}
