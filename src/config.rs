//! Configuration types for the chat engine.

use crate::backend::{BackendKind, select_backend};
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, fixed at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults for the chat session.
    pub chat: ChatConfig,
    /// Model catalog, quantization and cache settings.
    pub models: ModelConfig,
    /// Local-model generation parameters.
    pub generation: GenerationConfig,
    /// Remote chat completions API settings.
    pub remote: RemoteConfig,
    /// Speech-to-text settings.
    pub stt: SttConfig,
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Persona selected when the session starts.
    pub default_persona: String,
    /// Model selected (and loaded) when the session starts.
    pub default_model: String,
    /// Delay between stub emissions in milliseconds.
    pub parrot_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_persona: crate::persona::DEFAULT_PERSONA.to_owned(),
            default_model: "gpt-3.5-turbo".to_owned(),
            parrot_delay_ms: 20,
        }
    }
}

impl ChatConfig {
    /// Stub emission delay as a [`Duration`].
    pub fn parrot_delay(&self) -> Duration {
        Duration::from_millis(self.parrot_delay_ms)
    }
}

/// One selectable model and the backend that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Name shown to the user.
    pub name: String,
    /// Backend chosen for this model.
    pub backend: BackendKind,
    /// HuggingFace repo ID for tokenizer and weights (local backend only).
    #[serde(default)]
    pub repo_id: Option<String>,
}

impl ModelEntry {
    fn new(name: &str, backend: BackendKind, repo_id: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            backend,
            repo_id: repo_id.map(str::to_owned),
        }
    }
}

/// Model catalog and loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Quantization precision for local models: `"4"` or `"full"`.
    pub precision: String,
    /// Directory for caching downloaded tokenizers and weights.
    pub cache_dir: PathBuf,
    /// Known models, in display order.
    pub entries: Vec<ModelEntry>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            precision: "4".to_owned(),
            cache_dir: default_cache_dir(),
            entries: vec![
                ModelEntry::new("parrot-test", BackendKind::Stub, None),
                ModelEntry::new(
                    "mixtral8x7b",
                    BackendKind::LocalModel,
                    Some("mistralai/Mixtral-8x7B-Instruct-v0.1"),
                ),
                ModelEntry::new("gpt-3.5-turbo", BackendKind::RemoteApi, None),
                ModelEntry::new(
                    "llama2-chat",
                    BackendKind::LocalModel,
                    Some("meta-llama/Llama-2-7b-chat-hf"),
                ),
                ModelEntry::new(
                    "mistral7b-instruct",
                    BackendKind::LocalModel,
                    Some("mistralai/Mistral-7B-Instruct-v0.2"),
                ),
            ],
        }
    }
}

impl ModelConfig {
    /// Resolves a model name to its catalog entry.
    ///
    /// Names missing from the catalog fall back to [`select_backend`] with no
    /// repo ID.
    pub fn resolve(&self, model_name: &str) -> ModelEntry {
        if let Some(entry) = self.entries.iter().find(|e| e.name == model_name) {
            return entry.clone();
        }
        let backend = select_backend(model_name);
        tracing::debug!("model '{model_name}' not in catalog, name heuristic chose {backend}");
        ModelEntry::new(model_name, backend, None)
    }

    /// Model names in catalog order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Local-model generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum tokens generated per answer.
    pub max_new_tokens: usize,
    /// Sample from the distribution; greedy decoding when false.
    pub do_sample: bool,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Top-k sampling cutoff.
    pub top_k: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Beam count. Only a single beam is generated.
    pub num_beams: usize,
    /// Inactivity window on the token channel before giving up.
    pub token_timeout_ms: u64,
    /// Bounded capacity of the token channel between generator and consumer.
    pub channel_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            do_sample: true,
            top_p: 0.95,
            top_k: 1000,
            temperature: 1.0,
            num_beams: 1,
            token_timeout_ms: 10_000,
            channel_capacity: 64,
        }
    }
}

impl GenerationConfig {
    /// Token channel inactivity timeout as a [`Duration`].
    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }
}

/// Remote chat completions API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the OpenAI-compatible server.
    pub api_url: String,
    /// Model identifier sent with every request.
    pub api_model: String,
    /// API key. Leave empty to read it from `api_key_env`.
    pub api_key: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            api_model: "gpt-3.5-turbo".to_owned(),
            api_key: String::new(),
            api_key_env: "OPENAI_API_KEY".to_owned(),
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// HuggingFace model ID for the STT model.
    pub model_id: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            // ONNX export; the upstream NVIDIA repo only ships .nemo files.
            model_id: "istupakov/parakeet-tdt-0.6b-v3-onnx".to_owned(),
        }
    }
}

/// Returns the default model cache directory.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("huggingface")
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/freudgpt/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("freudgpt")
            .join("config.toml")
    }
}
