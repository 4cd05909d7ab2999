//! Conversation Registry
//!
//! Maps a [`ConversationId`] to the handler responsible for consuming its
//! events, tagged with the execution context the handler was registered
//! from. The registry is the only piece of state (besides the pending
//! queue) shared between the foreground thread and the background
//! scheduler, so every operation on it must be safe to call from either.
//!
//! # Thread Safety
//!
//! The registry uses `Arc<RwLock<>>` to allow concurrent read access while
//! serializing writes. Lookups (one per emit) vastly outnumber
//! registration changes, and event rates are UI-speed, so a single lock is
//! sufficient.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Unique identifier for one logical exchange between a requester and a
/// background operation.
///
/// Callers may pre-allocate an id to correlate a conversation with a
/// domain entity (e.g. a tree node) before the operation starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    /// Create a new unique conversation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first 8 chars of the UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// The execution context a piece of code runs on.
///
/// Exactly two logical contexts exist: the single-threaded cooperative
/// background scheduler driving network I/O, and the single foreground
/// thread that owns all UI-visible state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// The UI/event-processing thread. Must never block.
    Foreground,
    /// The cooperative async scheduler thread.
    Background,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::Background => write!(f, "background"),
        }
    }
}

type HandlerFn = Box<dyn FnMut(ConversationId, Event) + Send>;

/// A cheaply cloneable callback handle invoked once per delivered event.
///
/// Handlers may be invoked from either context depending on where they
/// were registered; the closure therefore has to be `Send`. A panic inside
/// the closure is caught at the invocation boundary and logged so that a
/// single misbehaving handler cannot take down the drain loop or the
/// scheduler.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<Mutex<HandlerFn>>,
}

impl Handler {
    /// Wrap a closure as a handler.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(ConversationId, Event) + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(f))),
        }
    }

    /// Invoke the handler with panic isolation.
    pub(crate) fn invoke(&self, id: ConversationId, event: Event) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut f = self.inner.lock();
            f(id, event);
        }));
        if result.is_err() {
            tracing::error!(conversation_id = %id, "handler panicked; event dropped");
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// A registered handler together with the context it was registered from.
///
/// The recorded context decides delivery: an emit from the same context
/// invokes the handler in-line, an emit from the other context goes
/// through the cross-context handoff.
#[derive(Clone, Debug)]
pub struct HandlerRegistration {
    /// The callback consuming this conversation's events.
    pub handler: Handler,
    /// Context the handler must execute on.
    pub context: ExecutionContext,
}

/// Thread-safe registry of live conversations.
#[derive(Clone, Default)]
pub struct ConversationRegistry {
    inner: Arc<RwLock<HashMap<ConversationId, HandlerRegistration>>>,
}

impl ConversationRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a conversation.
    ///
    /// If `id` is `None` a fresh id is generated. The entry is visible to
    /// concurrent `lookup`/`unregister` calls as soon as this returns.
    /// Re-registering a live id replaces the previous handler; that is
    /// logged because it usually indicates an id reuse bug upstream.
    pub fn register(
        &self,
        id: Option<ConversationId>,
        handler: Handler,
        context: ExecutionContext,
    ) -> ConversationId {
        let id = id.unwrap_or_default();
        let previous = self
            .inner
            .write()
            .insert(id, HandlerRegistration { handler, context });
        if previous.is_some() {
            tracing::warn!(conversation_id = %id, "replaced live registration");
        } else {
            tracing::debug!(conversation_id = %id, %context, "conversation registered");
        }
        id
    }

    /// Look up the registration for a conversation.
    ///
    /// Absence is a normal outcome (late or duplicate completion events),
    /// never an error.
    #[must_use]
    pub fn lookup(&self, id: ConversationId) -> Option<HandlerRegistration> {
        self.inner.read().get(&id).cloned()
    }

    /// Remove a conversation. Idempotent; returns whether an entry was
    /// actually removed.
    pub fn unregister(&self, id: ConversationId) -> bool {
        let removed = self.inner.write().remove(&id).is_some();
        if removed {
            tracing::debug!(conversation_id = %id, "conversation unregistered");
        }
        removed
    }

    /// Check whether a conversation is live.
    #[must_use]
    pub fn contains(&self, id: ConversationId) -> bool {
        self.inner.read().contains_key(&id)
    }

    /// Number of live conversations.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }
}

impl fmt::Debug for ConversationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConversationRegistry")
            .field("count", &inner.len())
            .field("conversations", &inner.keys().collect::<Vec<_>>())
            .finish()
    }
}
