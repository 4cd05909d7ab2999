//! Conversation Events
//!
//! The payload type delivered from a running background operation to the
//! handler registered for its conversation. A streaming generation emits a
//! sequence of `Token` events followed by `Done` (or `Error` if the stream
//! broke mid-way). Ordering is guaranteed within one conversation, never
//! across conversations.

use serde::{Deserialize, Serialize};

/// One event sent from a background operation to its conversation handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A chunk of generated text arrived from the backend.
    Token {
        /// The text fragment (may be a partial word or several words).
        text: String,
    },
    /// The operation finished; no further events will follow.
    Done,
    /// The operation failed; no further events will follow.
    Error {
        /// Human-readable failure description.
        detail: String,
    },
}

impl Event {
    /// Convenience constructor for a token event.
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { text: text.into() }
    }

    /// Whether this event ends the conversation's stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { text } => write!(f, "token({} bytes)", text.len()),
            Self::Done => write!(f, "done"),
            Self::Error { detail } => write!(f, "error({detail})"),
        }
    }
}
