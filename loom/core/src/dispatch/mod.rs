//! Dispatcher Core
//!
//! The scheduling engine that lets the single-threaded background
//! scheduler (many concurrently open streaming connections, multiplexed
//! cooperatively) communicate with the single-threaded, non-reentrant
//! foreground consumer without the foreground ever blocking and without
//! the background ever touching foreground-owned state directly.
//!
//! # Architecture
//!
//! ```text
//!   foreground thread                      background scheduler thread
//!  ┌──────────────────┐   submit/call    ┌───────────────────────────┐
//!  │ UI event loop    │ ───────────────► │ tokio current-thread rt   │
//!  │                  │                  │   producer ops:           │
//!  │  drain() ◄─ wake ┼── queue + wake ──┼   emit(id, event)         │
//!  │   └─ handlers    │                  │   complete(id)            │
//!  └──────────────────┘                  └───────────────────────────┘
//! ```
//!
//! # Producer Contract
//!
//! A long-running operation that streams multiple events is written as an
//! async fn taking the dispatcher handle and its conversation id, calling
//! [`Dispatcher::emit`] zero or more times and [`Dispatcher::complete`]
//! once. Operations that produce a single value use [`Dispatcher::call`],
//! which emits the returned event and completes automatically. Errors
//! returned by an operation are caught at the spawn boundary and logged;
//! they never crash the scheduler.

pub mod registry;

mod queue;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use tokio::runtime::Handle;

use crate::event::Event;
use crate::runtime::ForegroundWaker;

use self::queue::{PendingDelivery, PendingQueue};
pub use self::registry::{ConversationId, ConversationRegistry, ExecutionContext, Handler};

/// Errors surfaced to callers of the dispatcher.
///
/// Everything else that can go wrong inside the core (unknown ids, failed
/// operations, panicking handlers) is recovered locally and logged,
/// because failures cannot safely propagate across the context boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher has been closed for shutdown and no longer accepts
    /// new submissions.
    #[error("dispatcher is shutting down; submission rejected")]
    ShuttingDown,
}

struct DispatcherInner {
    registry: ConversationRegistry,
    pending: PendingQueue,
    waker: Arc<dyn ForegroundWaker>,
    background: Handle,
    background_thread: ThreadId,
    closed: AtomicBool,
}

/// Handle to the dispatch core. Cheap to clone; all clones share state.
///
/// Created once at process start (see
/// [`BackgroundRuntime::dispatcher`](crate::runtime::BackgroundRuntime::dispatcher))
/// and passed explicitly to every component that needs it. There is no
/// process-wide accessor.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher bound to a background runtime.
    ///
    /// `background_thread` is the native thread the runtime's scheduler
    /// runs on; it is what context identity checks compare against.
    #[must_use]
    pub fn new(
        background: Handle,
        background_thread: ThreadId,
        waker: Arc<dyn ForegroundWaker>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: ConversationRegistry::new(),
                pending: PendingQueue::new(),
                waker,
                background,
                background_thread,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The execution context of the calling thread.
    ///
    /// Anything that is not the background scheduler thread counts as
    /// foreground, including auxiliary threads; only the scheduler thread
    /// itself may deliver in-line to background-registered handlers.
    #[must_use]
    pub fn current_context(&self) -> ExecutionContext {
        if std::thread::current().id() == self.inner.background_thread {
            ExecutionContext::Background
        } else {
            ExecutionContext::Foreground
        }
    }

    /// Register a handler for a conversation, stamped with the calling
    /// context. Returns the id (freshly generated when `id` is `None`).
    pub fn register<F>(&self, id: Option<ConversationId>, handler: F) -> ConversationId
    where
        F: FnMut(ConversationId, Event) + Send + 'static,
    {
        self.register_handler(id, Handler::new(handler))
    }

    /// Register a pre-built [`Handler`].
    pub fn register_handler(&self, id: Option<ConversationId>, handler: Handler) -> ConversationId {
        self.inner
            .registry
            .register(id, handler, self.current_context())
    }

    /// Remove a conversation's registration. Idempotent.
    pub fn unregister(&self, id: ConversationId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Whether a conversation is still live.
    ///
    /// Producers streaming into an abandoned conversation can poll this to
    /// stop early instead of emitting into the void forever.
    #[must_use]
    pub fn is_registered(&self, id: ConversationId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Submit a producer operation onto the background scheduler.
    ///
    /// Registers `handler` (if present) under the conversation id, then
    /// spawns `operation(dispatcher, id)`. Returns immediately; never
    /// blocks the caller. An `Err` returned by the operation is logged and
    /// the conversation is left uncompleted. Callers treat a registration
    /// that never completes as silently failed and own any timeout policy.
    pub fn submit<F, Fut>(
        &self,
        operation: F,
        handler: Option<Handler>,
        id: Option<ConversationId>,
    ) -> Result<ConversationId, DispatchError>
    where
        F: FnOnce(Dispatcher, ConversationId) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(DispatchError::ShuttingDown);
        }

        let id = match handler {
            Some(handler) => self.register_handler(id, handler),
            None => id.unwrap_or_default(),
        };

        let dispatcher = self.clone();
        self.inner.background.spawn(async move {
            if let Err(error) = operation(dispatcher, id).await {
                tracing::error!(
                    conversation_id = %id,
                    error = %error,
                    "background operation failed"
                );
            }
        });

        Ok(id)
    }

    /// Simplified single-result form of [`submit`](Self::submit).
    ///
    /// Runs `operation` to completion on the background scheduler, emits
    /// its return value as one event, then completes the conversation,
    /// with no manual emit/complete bookkeeping in the operation. On error the
    /// conversation is completed without emitting, so a failing operation
    /// never wedges the registry.
    pub fn call<F, Fut>(
        &self,
        operation: F,
        handler: Handler,
        id: Option<ConversationId>,
    ) -> Result<ConversationId, DispatchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Event>> + Send + 'static,
    {
        self.submit(
            move |dispatcher, id| async move {
                match operation().await {
                    Ok(event) => dispatcher.emit(id, event),
                    Err(error) => {
                        tracing::error!(
                            conversation_id = %id,
                            error = %error,
                            "call operation failed; completing without result"
                        );
                    }
                }
                dispatcher.complete(id);
                Ok(())
            },
            Some(handler),
            id,
        )
    }

    /// Schedule a background operation whose result is discarded.
    ///
    /// For side-effect-only work (e.g. persistence) where no reply is
    /// expected. Errors are logged, not propagated. Dropped silently (with
    /// a warning) once the dispatcher is closed.
    pub fn fire_and_forget<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_closed() {
            tracing::warn!("fire-and-forget rejected; dispatcher is shutting down");
            return;
        }
        self.inner.background.spawn(async move {
            if let Err(error) = future.await {
                tracing::error!(error = %error, "fire-and-forget operation failed");
            }
        });
    }

    /// Send one event to a conversation's registered handler.
    ///
    /// Non-blocking from the caller's point of view. Delivery depends on
    /// where the handler was registered:
    ///
    /// - unknown id: logged at warning level, event dropped;
    /// - same context as the caller: handler invoked synchronously,
    ///   in-line;
    /// - foreground handler, background caller: queued for the next
    ///   [`drain`](Self::drain), foreground woken;
    /// - background handler, foreground caller: invocation spawned onto
    ///   the background scheduler.
    pub fn emit(&self, id: ConversationId, event: Event) {
        let Some(registration) = self.inner.registry.lookup(id) else {
            tracing::warn!(
                conversation_id = %id,
                event = %event,
                "emit for unknown conversation; event dropped"
            );
            return;
        };

        let caller = self.current_context();
        if caller == registration.context {
            registration.handler.invoke(id, event);
            return;
        }

        match registration.context {
            ExecutionContext::Foreground => {
                self.inner.pending.push(PendingDelivery {
                    handler: registration.handler,
                    id,
                    event,
                });
                self.inner.waker.wake();
            }
            ExecutionContext::Background => {
                let handler = registration.handler;
                self.inner.background.spawn(async move {
                    handler.invoke(id, event);
                });
            }
        }
    }

    /// Signal that no more events will come for this conversation.
    ///
    /// Unregisters the id; deliveries already queued still reach the
    /// handler because queue entries carry the handler itself. Completing
    /// an unknown (or already-completed) conversation is logged and
    /// otherwise a no-op.
    pub fn complete(&self, id: ConversationId) {
        if !self.unregister(id) {
            tracing::warn!(conversation_id = %id, "complete for unknown conversation");
        }
    }

    /// Foreground pump: deliver everything queued for the foreground.
    ///
    /// Called once per foreground tick by whatever owns the UI thread, in
    /// response to a wake signal and on a periodic fallback tick. Takes
    /// one snapshot of the queue and invokes each handler in FIFO order;
    /// a panicking handler is logged and does not stop the drain. Items
    /// appended while draining wait for the next tick, so the work per
    /// call is bounded. Returns the number of events delivered.
    pub fn drain(&self) -> usize {
        let batch = self.inner.pending.take_all();
        let count = batch.len();
        for delivery in batch {
            delivery.handler.invoke(delivery.id, delivery.event);
        }
        count
    }

    /// Number of deliveries currently awaiting the foreground.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of live conversations.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.inner.registry.count()
    }

    /// Stop accepting new submissions. Part of shutdown; in-flight
    /// operations keep running until the background runtime is stopped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        tracing::info!("dispatcher closed for new submissions");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("conversations", &self.inner.registry.count())
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{BackgroundRuntime, NullWaker};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn test_dispatcher() -> (BackgroundRuntime, Dispatcher) {
        let runtime = BackgroundRuntime::start().expect("background runtime");
        let dispatcher = runtime.dispatcher(Arc::new(NullWaker));
        (runtime, dispatcher)
    }

    #[test]
    fn test_current_context_is_foreground_off_the_scheduler() {
        let (_runtime, dispatcher) = test_dispatcher();
        assert_eq!(dispatcher.current_context(), ExecutionContext::Foreground);
    }

    #[test]
    fn test_emit_unknown_id_is_dropped() {
        let (_runtime, dispatcher) = test_dispatcher();
        // Must not panic, must not queue anything.
        dispatcher.emit(ConversationId::new(), Event::Done);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn test_complete_unknown_id_is_noop() {
        let (_runtime, dispatcher) = test_dispatcher();
        dispatcher.complete(ConversationId::new());
        assert_eq!(dispatcher.conversation_count(), 0);
    }

    #[test]
    fn test_register_unregister_lookup_absent() {
        let (_runtime, dispatcher) = test_dispatcher();
        let id = dispatcher.register(None, |_, _| {});
        assert!(dispatcher.is_registered(id));
        dispatcher.unregister(id);
        assert!(!dispatcher.is_registered(id));
    }

    #[test]
    fn test_closed_dispatcher_rejects_submission() {
        let (_runtime, dispatcher) = test_dispatcher();
        dispatcher.close();
        let result = dispatcher.submit(|_, _| async { Ok(()) }, None, None);
        assert!(matches!(result, Err(DispatchError::ShuttingDown)));
    }

    #[test]
    fn test_foreground_emit_to_foreground_handler_is_synchronous() {
        let (_runtime, dispatcher) = test_dispatcher();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = dispatcher.register(None, move |_, event| sink.lock().push(event));

        // Registered and emitted from the same (foreground) context:
        // delivery happens in-line, no drain involved.
        dispatcher.emit(id, Event::token("x"));
        assert_eq!(seen.lock().as_slice(), &[Event::token("x")]);
        assert_eq!(dispatcher.pending_len(), 0);
    }

    #[test]
    fn test_events_after_complete_are_dropped() {
        let (_runtime, dispatcher) = test_dispatcher();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = dispatcher.register(None, move |_, event| sink.lock().push(event));

        dispatcher.emit(id, Event::token("before"));
        dispatcher.complete(id);
        dispatcher.emit(id, Event::token("after"));

        assert_eq!(seen.lock().as_slice(), &[Event::token("before")]);
    }
}
