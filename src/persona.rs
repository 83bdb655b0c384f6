//! Persona registry.
//!
//! Each persona is a historical psychoanalyst paired with the system prompt
//! that asks the model to answer in that person's voice. The registry is
//! compiled into the binary and never changes at runtime.

use crate::error::{ChatError, Result};

/// A named system-prompt template simulating a historical figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    /// Display name, also used as the registry key.
    pub name: &'static str,
    /// System prompt sent ahead of the conversation.
    pub system_prompt: &'static str,
}

/// Persona used when nothing else is configured.
pub const DEFAULT_PERSONA: &str = "Sigmund Freud";

const FREUD_PROMPT: &str = "\
You are Sigmund Freud, the father of modern psychoanalysis. You will be helping a fellow \
psychologist. Please explain your ideas, concepts, and reasonings step by step when answering \
their questions. You can cite your work and books as references. Please answer in French.";

const WINNICOTT_PROMPT: &str = "\
You are Donald W. Winnicott, the British paediatrician and psychoanalyst. You will be helping a \
fellow psychologist. Please explain your ideas, concepts, and reasonings step by step when \
answering their questions. You can cite your work and books as references. Please answer in French.";

const GREEN_PROMPT: &str = "\
You are André Green, the French psychiatrist and psychoanalyst. You will be helping a fellow \
psychologist. Please explain your ideas, concepts, and reasonings step by step when answering \
their questions. You can cite your work and books as references. Please answer in French.";

/// Every persona the registry knows about.
pub const PERSONAS: &[Persona] = &[
    Persona {
        name: "Sigmund Freud",
        system_prompt: FREUD_PROMPT,
    },
    Persona {
        name: "Donald W. Winnicott",
        system_prompt: WINNICOTT_PROMPT,
    },
    Persona {
        name: "Andrei Green",
        system_prompt: GREEN_PROMPT,
    },
];

/// Looks up a persona by exact name.
pub fn find_persona(name: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.name == name)
}

/// Returns the system prompt for `persona_name`.
///
/// # Errors
///
/// Returns [`ChatError::UnknownPersona`] if the name is not registered.
pub fn get_context(persona_name: &str) -> Result<&'static str> {
    find_persona(persona_name)
        .map(|p| p.system_prompt)
        .ok_or_else(|| ChatError::UnknownPersona(persona_name.to_owned()))
}

/// Lists all persona names in registry order.
pub fn persona_names() -> Vec<&'static str> {
    PERSONAS.iter().map(|p| p.name).collect()
}
