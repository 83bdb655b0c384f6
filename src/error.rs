//! Error types for the chat engine.

use std::time::Duration;

/// Top-level error type for persona chat generation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The requested persona is not in the registry.
    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    /// Generation was requested for a local model that has not been loaded.
    #[error("model '{0}' is not loaded")]
    ModelNotLoaded(String),

    /// Missing or rejected credential for the remote API.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// The local token channel stayed silent for longer than the configured window.
    #[error("generation timed out: no token received for {}ms", .0.as_millis())]
    GenerationTimeout(Duration),

    /// The remote stream dropped after it had started.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// The remote API rejected the request before streaming began.
    #[error("request error: {0}")]
    Request(String),

    /// Local inference engine error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Model download or loading error.
    #[error("model error: {0}")]
    Model(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_reports_millis() {
        let err = ChatError::GenerationTimeout(Duration::from_secs(10));
        assert_eq!(
            err.to_string(),
            "generation timed out: no token received for 10000ms"
        );
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::Io(_)));
    }
}
