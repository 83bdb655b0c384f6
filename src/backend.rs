//! Generation backend selection.
//!
//! Backends are normally chosen explicitly per model in the configured
//! catalog (see [`crate::config::ModelConfig::resolve`]). [`select_backend`]
//! keeps the historical model-name convention working for names that are not
//! in the catalog.

use serde::{Deserialize, Serialize};

/// Which strategy turns a conversation into a streamed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Echoes the user's message back; used for UI testing.
    Stub,
    /// Runs a model on this machine via mistral.rs.
    LocalModel,
    /// Streams from an OpenAI-compatible chat completions API.
    RemoteApi,
}

impl BackendKind {
    /// Whether loading this backend fetches tokenizer and weights.
    pub fn loads_weights(self) -> bool {
        matches!(self, BackendKind::LocalModel)
    }

    /// Short identifier used in logs and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Stub => "stub",
            BackendKind::LocalModel => "local_model",
            BackendKind::RemoteApi => "remote_api",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks a backend from a free-text model name.
///
/// - contains `"parrot"` → [`BackendKind::Stub`]
/// - otherwise, does not contain `"gpt"` → [`BackendKind::LocalModel`]
/// - otherwise → [`BackendKind::RemoteApi`]
pub fn select_backend(model_name: &str) -> BackendKind {
    if model_name.contains("parrot") {
        BackendKind::Stub
    } else if !model_name.contains("gpt") {
        BackendKind::LocalModel
    } else {
        BackendKind::RemoteApi
    }
}
