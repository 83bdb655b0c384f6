//! Stub backend that repeats the user's message.
//!
//! Used to exercise the streaming UI without a model or network access.

use super::ResponseStream;
use crate::error::Result;
use std::time::Duration;

/// Builds the full stub answer for `message`.
pub fn parrot_reply(message: &str, persona_name: &str) -> String {
    format!("Hey! {persona_name} here. Sorry I didn't hear well, did you say: {message}")
}

/// Streams the stub answer one character at a time.
///
/// Emits every prefix of [`parrot_reply`], from the first character to the
/// full string, sleeping `delay` before each emission.
pub fn generate_parrot(message: &str, persona_name: &str, delay: Duration) -> ResponseStream {
    let reply = parrot_reply(message, persona_name);
    Box::pin(async_stream::stream! {
        let ends: Vec<usize> = reply
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();
        for end in ends {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let prefix: Result<String> = Ok(reply[..end].to_owned());
            yield prefix;
        }
    })
}
