//! Mock Token Producer
//!
//! A producer-contract operation that streams canned tokens instead of
//! talking to a real generation backend. Used by tests and by mock mode
//! (`Config::mock`) for developing the UI without a backend running.

use std::time::Duration;

use crate::dispatch::{ConversationId, Dispatcher};
use crate::event::Event;

/// Filler vocabulary for mock generations.
const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
];

/// Build a deterministic mock paragraph of `len` words.
#[must_use]
pub fn mock_paragraph(len: usize) -> Vec<String> {
    (0..len)
        .map(|i| {
            let word = WORDS[i % WORDS.len()];
            if i + 1 == len {
                format!("{word}.")
            } else {
                format!("{word} ")
            }
        })
        .collect()
}

/// Stream `words` as token events, one per `delay`, then complete.
///
/// Follows the producer contract: emits `Token` events tagged with the
/// conversation id, a final `Done`, then completes. If the conversation
/// is abandoned mid-stream the producer notices the missing registration
/// and stops early instead of emitting into the void.
pub async fn stream_mock_tokens(
    dispatcher: Dispatcher,
    id: ConversationId,
    words: Vec<String>,
    delay: Duration,
) -> anyhow::Result<()> {
    for word in words {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !dispatcher.is_registered(id) {
            tracing::debug!(conversation_id = %id, "conversation abandoned; stopping mock stream");
            return Ok(());
        }
        dispatcher.emit(id, Event::token(word));
    }
    dispatcher.emit(id, Event::Done);
    dispatcher.complete(id);
    Ok(())
}
