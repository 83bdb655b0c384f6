//! Streaming answer generation.
//!
//! Provides three backends, all producing the same cumulative stream:
//! - **Parrot** ([`parrot`]): echoes the message back, for UI testing.
//! - **Local** ([`local`]): a mistral.rs model driven on a background task.
//! - **API** ([`api`]): any OpenAI-compatible chat completions server.
//!
//! Every item of a [`ResponseStream`] is the full answer generated so far,
//! and each item strictly extends the previous one.

pub mod api;
pub mod local;
pub mod parrot;
pub mod prompt;
pub mod sse;

pub use api::ApiClient;
pub use local::{MistralGenerator, TextGenerator};

use crate::error::Result;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed stream of cumulative partial answers.
///
/// A failure is yielded as a final `Err` item; nothing follows it.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One completed exchange of the conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// What the user said.
    pub user: String,
    /// What the persona answered.
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

impl From<(String, String)> for ConversationTurn {
    fn from((user, assistant): (String, String)) -> Self {
        Self { user, assistant }
    }
}

/// Accumulates streamed deltas into cumulative emissions.
#[derive(Debug, Default)]
pub struct PartialResponse {
    text: String,
    emissions: usize,
}

impl PartialResponse {
    /// Appends `delta` and returns the new cumulative text.
    ///
    /// Empty deltas return `None` so that every emission grows.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        if delta.is_empty() {
            return None;
        }
        self.text.push_str(delta);
        self.emissions += 1;
        Some(self.text.clone())
    }

    /// Number of emissions produced so far.
    pub fn emissions(&self) -> usize {
        self.emissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_response_is_cumulative() {
        let mut partial = PartialResponse::default();
        assert_eq!(partial.push("Bon").as_deref(), Some("Bon"));
        assert_eq!(partial.push("jour").as_deref(), Some("Bonjour"));
        assert_eq!(partial.emissions(), 2);
    }

    #[test]
    fn partial_response_skips_empty_delta() {
        let mut partial = PartialResponse::default();
        assert!(partial.push("").is_none());
        partial.push("a");
        assert!(partial.push("").is_none());
        assert_eq!(partial.emissions(), 1);
    }

    #[test]
    fn turn_from_tuple() {
        let turn = ConversationTurn::from(("hi".to_owned(), "bonjour".to_owned()));
        assert_eq!(turn, ConversationTurn::new("hi", "bonjour"));
    }
}
