//! Chat messages and the transcript they form.
//!
//! A transcript is an ordered, append-only list of role-tagged messages. The same
//! shape is sent to Ollama as `messages` and written verbatim to history files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// A single message in a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation history for one history key.
pub type Transcript = Vec<Message>;

/// One line of the chat pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEntry {
    User(String),
    Assistant {
        name: String,
        model: String,
        text: String,
    },
    System(String),
}

impl ChatEntry {
    pub fn system(text: impl Into<String>) -> Self {
        ChatEntry::System(text.into())
    }

    /// Render a stored message the way the chat pane shows it.
    pub fn from_message(message: &Message, ai_name: &str, model: &str) -> Self {
        match message.role {
            Role::User => ChatEntry::User(message.content.clone()),
            Role::Assistant => ChatEntry::Assistant {
                name: ai_name.to_string(),
                model: model.to_string(),
                text: message.content.clone(),
            },
        }
    }
}

impl fmt::Display for ChatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatEntry::User(text) => write!(f, "You: {}", text),
            ChatEntry::Assistant { name, model, text } => {
                write!(f, "{} ({}): {}", name, model, text)
            }
            ChatEntry::System(text) => write!(f, "System: {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_lowercase_role() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let parsed: Result<Message, _> =
            serde_json::from_str(r#"{"role":"tool","content":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn chat_entries_render_with_speaker_prefix() {
        assert_eq!(ChatEntry::User("hello".into()).to_string(), "You: hello");
        assert_eq!(
            ChatEntry::from_message(&Message::assistant("hey"), "Bot", "llama3:8b").to_string(),
            "Bot (llama3:8b): hey"
        );
        assert_eq!(ChatEntry::system("No model selected.").to_string(), "System: No model selected.");
    }
}
