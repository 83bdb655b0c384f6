//! Model loading and the shared "current model" slot.
//!
//! Only one model is resident at a time. A load takes the slot's write lock,
//! releases the previous handle, and installs the new one before unlocking,
//! so readers never observe a half-loaded model.

use crate::backend::BackendKind;
use crate::config::ModelConfig;
use crate::error::{ChatError, Result};
use crate::llm::{MistralGenerator, TextGenerator};
use crate::models::ModelStore;
use async_trait::async_trait;
use mistralrs::{IsqType, TextModelBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::info;

/// Weight precision for local models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// In-situ 4-bit quantization.
    FourBit,
    /// Unquantized weights.
    Full,
}

impl Precision {
    /// Parse the configured precision string.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for anything other than `"4"` or `"full"`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "4" => Ok(Self::FourBit),
            "full" => Ok(Self::Full),
            other => Err(ChatError::Config(format!(
                "unsupported precision '{other}', expected \"4\" or \"full\""
            ))),
        }
    }
}

/// What the slot holds after a model has been loaded.
#[derive(Clone)]
pub enum ModelHandle {
    /// A stub or remote model: nothing resident, just the name.
    Named {
        model_name: String,
        backend: BackendKind,
    },
    /// A local model with tokenizer and weights in memory.
    Local {
        model_name: String,
        generator: Arc<dyn TextGenerator>,
    },
}

impl ModelHandle {
    pub fn model_name(&self) -> &str {
        match self {
            Self::Named { model_name, .. } | Self::Local { model_name, .. } => model_name,
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Named { backend, .. } => *backend,
            Self::Local { .. } => BackendKind::LocalModel,
        }
    }

    /// The local generator, if this handle owns one.
    pub fn generator(&self) -> Option<Arc<dyn TextGenerator>> {
        match self {
            Self::Local { generator, .. } => Some(Arc::clone(generator)),
            Self::Named { .. } => None,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named {
                model_name,
                backend,
            } => f
                .debug_struct("Named")
                .field("model_name", model_name)
                .field("backend", backend)
                .finish(),
            Self::Local {
                model_name,
                generator,
            } => f
                .debug_struct("Local")
                .field("model_name", model_name)
                .field("model_id", &generator.model_id())
                .finish(),
        }
    }
}

/// Process-wide slot for the current model. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct ModelSlot {
    inner: Arc<RwLock<Option<ModelHandle>>>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the currently installed handle.
    pub async fn current(&self) -> Option<ModelHandle> {
        self.inner.read().await.clone()
    }
}

/// Loads local weights for a repo.
#[async_trait]
pub trait LocalModelFactory: Send + Sync {
    async fn load(
        &self,
        repo_id: &str,
        precision: Precision,
        cache_dir: &Path,
    ) -> Result<Arc<dyn TextGenerator>>;
}

/// Factory that loads models with mistral.rs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MistralFactory;

#[async_trait]
impl LocalModelFactory for MistralFactory {
    async fn load(
        &self,
        repo_id: &str,
        precision: Precision,
        cache_dir: &Path,
    ) -> Result<Arc<dyn TextGenerator>> {
        let store = ModelStore::new(cache_dir)?;
        let repo = repo_id.to_owned();
        let snapshot_dir = tokio::task::spawn_blocking(move || store.get_model_repo(&repo))
            .await
            .map_err(|e| ChatError::Model(format!("model download task failed: {e}")))??;
        let snapshot = snapshot_dir.to_string_lossy().into_owned();
        info!("loading {repo_id} from {snapshot}");

        let mut builder = TextModelBuilder::new(snapshot).with_logging();
        if precision == Precision::FourBit {
            builder = builder.with_isq(IsqType::Q4K);
        }
        let model = builder
            .build()
            .await
            .map_err(|e| ChatError::Model(format!("model build failed: {e}")))?;

        Ok(Arc::new(MistralGenerator::new(Arc::new(model), repo_id)))
    }
}

/// Switches the current model in a [`ModelSlot`].
pub struct ModelLoader {
    slot: ModelSlot,
    models: ModelConfig,
    factory: Arc<dyn LocalModelFactory>,
}

impl ModelLoader {
    pub fn new(models: ModelConfig, factory: Arc<dyn LocalModelFactory>) -> Self {
        Self {
            slot: ModelSlot::new(),
            models,
            factory,
        }
    }

    pub fn slot(&self) -> &ModelSlot {
        &self.slot
    }

    /// Load `model_name` with the configured precision and cache directory.
    ///
    /// # Errors
    ///
    /// See [`ModelLoader::load_with`].
    pub async fn load(&self, model_name: &str) -> Result<ModelHandle> {
        let cache_dir = self.models.cache_dir.clone();
        self.load_with(model_name, &self.models.precision, &cache_dir)
            .await
    }

    /// Make `model_name` the current model.
    ///
    /// The previous handle is released before any new weights are fetched.
    /// Stub and remote models only record their name; `precision` and
    /// `cache_dir` are ignored for them.
    ///
    /// Local weights, config and tokenizer are downloaded into `cache_dir`
    /// and loaded from there.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if a local model has no repo ID or
    /// `precision` is not `"4"` or `"full"`; both are checked before the
    /// current model is released. Otherwise returns the factory's error if
    /// loading fails, leaving the slot empty.
    pub async fn load_with(
        &self,
        model_name: &str,
        precision: &str,
        cache_dir: &Path,
    ) -> Result<ModelHandle> {
        let entry = self.models.resolve(model_name);
        let local = if entry.backend.loads_weights() {
            let repo_id = entry.repo_id.clone().ok_or_else(|| {
                ChatError::Config(format!("model '{model_name}' has no repo_id configured"))
            })?;
            Some((repo_id, Precision::parse(precision)?))
        } else {
            None
        };

        let mut slot = self.slot.inner.write().await;

        if let Some(previous) = slot.take() {
            info!("releasing model '{}'", previous.model_name());
            drop(previous);
        }

        let handle = if let Some((repo_id, precision)) = local {
            info!("loading local model '{model_name}' from {repo_id} ({precision:?})");
            let start = Instant::now();
            let generator = self.factory.load(&repo_id, precision, cache_dir).await?;
            info!(
                "model '{model_name}' loaded in {:.1}s",
                start.elapsed().as_secs_f64()
            );
            ModelHandle::Local {
                model_name: model_name.to_owned(),
                generator,
            }
        } else {
            info!("selected {} model '{model_name}'", entry.backend);
            ModelHandle::Named {
                model_name: model_name.to_owned(),
                backend: entry.backend,
            }
        };

        *slot = Some(handle.clone());
        Ok(handle)
    }
}
