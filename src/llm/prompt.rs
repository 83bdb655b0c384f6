//! Prompt construction for the local and remote backends.
//!
//! The local backend receives a flat tagged transcript; the remote backend
//! receives a role-tagged message list. Both place the persona's system
//! prompt first, then the history oldest first, then the new message.

use super::ConversationTurn;
use serde::{Deserialize, Serialize};

/// Tag opening the system line of a transcript.
pub const SYSTEM_TAG: &str = "<system>:";
/// Tag opening each user line of a transcript.
pub const HUMAN_TAG: &str = "<human>:";
/// Tag opening each assistant line of a transcript.
pub const BOT_TAG: &str = "<bot>:";
/// First character of every tag. Models sometimes emit it alone as a token.
pub const TAG_OPEN: &str = "<";

/// Renders the conversation as a tagged transcript.
///
/// ```text
/// <system>:{system_prompt}
/// <human>:{turn.user}
/// <bot>:{turn.assistant}
/// <human>:{message}
/// <bot>:
/// ```
///
/// The trailing empty `<bot>:` line cues the model to answer.
pub fn render_transcript(
    system_prompt: &str,
    history: &[ConversationTurn],
    message: &str,
) -> String {
    let mut out = format!("{SYSTEM_TAG}{system_prompt}\n");
    for turn in history {
        out.push_str(HUMAN_TAG);
        out.push_str(&turn.user);
        out.push('\n');
        out.push_str(BOT_TAG);
        out.push_str(&turn.assistant);
        out.push('\n');
    }
    out.push_str(HUMAN_TAG);
    out.push_str(message);
    out.push('\n');
    out.push_str(BOT_TAG);
    out
}

/// Role of a chat completions message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_owned(),
        }
    }
}

/// Builds the role-tagged message list for a chat completions request.
pub fn chat_messages(
    system_prompt: &str,
    history: &[ConversationTurn],
    message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + history.len() * 2);
    messages.push(ChatMessage::new(Role::System, system_prompt));
    for turn in history {
        messages.push(ChatMessage::new(Role::User, &turn.user));
        messages.push(ChatMessage::new(Role::Assistant, &turn.assistant));
    }
    messages.push(ChatMessage::new(Role::User, message));
    messages
}
