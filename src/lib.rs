//! FreudGPT: chat with simulated historical psychoanalysts.
//!
//! A conversation turn is answered in the voice of a persona by one of three
//! backends:
//! - **Stub**: echoes the question back, character by character
//! - **Local model**: a HuggingFace model run in-process via `mistralrs`
//! - **Remote API**: an OpenAI-compatible chat completions endpoint
//!
//! Every backend streams *cumulative* text: each item is the whole answer so
//! far. Questions can also be spoken; they are transcribed with NVIDIA
//! Parakeet and answered on the next turn.

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod loader;
pub mod models;
pub mod persona;
pub mod stt;

pub use backend::{BackendKind, select_backend};
pub use chat::ChatEngine;
pub use config::AppConfig;
pub use error::{ChatError, Result};
pub use llm::{ConversationTurn, ResponseStream};
pub use loader::{ModelHandle, ModelLoader, ModelSlot, Precision};
pub use persona::{DEFAULT_PERSONA, get_context};
