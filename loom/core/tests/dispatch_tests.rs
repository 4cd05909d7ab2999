//! Dispatch Integration Tests
//!
//! End-to-end coverage of the dispatch core: delivery ordering, context
//! routing, late/unknown events, streaming into the generation tree, and
//! shutdown behavior. The test thread plays the foreground; a real
//! background scheduler runs behind every dispatcher.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use loom_core::{
    mock, BackgroundRuntime, ChannelWaker, ConversationId, DispatchError, Dispatcher, Event,
    ExecutionContext, GenerationId, GenerationState, GenerationTree, Handler,
};

const WAIT: Duration = Duration::from_secs(5);

fn start() -> (BackgroundRuntime, Dispatcher, Receiver<()>) {
    let runtime = BackgroundRuntime::start().expect("background runtime");
    let (waker, wake_rx) = ChannelWaker::new();
    let dispatcher = runtime.dispatcher(waker);
    (runtime, dispatcher, wake_rx)
}

/// Collects every delivered event, tagged with its conversation id.
fn recording_handler() -> (Handler, Arc<Mutex<Vec<(ConversationId, Event)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = Handler::new(move |id, event| sink.lock().push((id, event)));
    (handler, seen)
}

#[test]
fn cross_context_delivery_waits_for_drain() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (handler, seen) = recording_handler();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    // Handler registered from the foreground; the operation emits
    // immediately after being scheduled on the background context.
    dispatcher
        .submit(
            move |d, id| async move {
                d.emit(id, Event::token("early"));
                let _ = done_tx.send(());
                Ok(())
            },
            Some(handler),
            None,
        )
        .expect("submit");

    done_rx.recv_timeout(WAIT).expect("operation ran");

    // The emit happened, but the handler must not have: delivery is
    // queued until the foreground drains.
    assert!(seen.lock().is_empty());
    assert_eq!(dispatcher.pending_len(), 1);

    let delivered = dispatcher.drain();
    assert_eq!(delivered, 1);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn same_context_delivery_is_synchronous() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (result_tx, result_rx) = std::sync::mpsc::channel();

    // Handler registered from inside a background operation: emits from
    // the same context must invoke it in-line, with no drain involved.
    dispatcher
        .submit(
            move |d, _| async move {
                let seen = Arc::new(Mutex::new(Vec::new()));
                let sink = Arc::clone(&seen);
                let id = d.register(None, move |_, event| sink.lock().push(event));

                d.emit(id, Event::token("inline"));
                let visible = seen.lock().clone();
                d.complete(id);
                let _ = result_tx.send(visible);
                Ok(())
            },
            None,
            None,
        )
        .expect("submit");

    let visible = result_rx.recv_timeout(WAIT).expect("operation ran");
    assert_eq!(visible, vec![Event::token("inline")]);
    assert_eq!(dispatcher.pending_len(), 0);
}

#[test]
fn streamed_tokens_arrive_in_emission_order() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (handler, seen) = recording_handler();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let id = dispatcher
        .submit(
            move |d, id| async move {
                d.emit(id, Event::token("a"));
                d.emit(id, Event::token("b"));
                d.emit(id, Event::Done);
                d.complete(id);
                let _ = done_tx.send(());
                Ok(())
            },
            Some(handler),
            None,
        )
        .expect("submit");

    done_rx.recv_timeout(WAIT).expect("operation ran");
    dispatcher.drain();

    let text: String = seen
        .lock()
        .iter()
        .filter_map(|(_, event)| match event {
            Event::Token { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "ab");

    // Terminal event came last, and the conversation is gone.
    assert_eq!(seen.lock().last().map(|(_, e)| e.clone()), Some(Event::Done));
    assert!(!dispatcher.is_registered(id));
    assert_eq!(dispatcher.conversation_count(), 0);
}

#[test]
fn interleaved_conversations_stay_isolated() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (handler_a, seen_a) = recording_handler();
    let (handler_b, seen_b) = recording_handler();
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let done_tx_b = done_tx.clone();

    let id_a = dispatcher
        .submit(
            move |d, id| async move {
                for n in 0..10 {
                    d.emit(id, Event::token(format!("a{n}")));
                    tokio::task::yield_now().await;
                }
                d.complete(id);
                let _ = done_tx.send(());
                Ok(())
            },
            Some(handler_a),
            None,
        )
        .expect("submit a");

    let id_b = dispatcher
        .submit(
            move |d, id| async move {
                for n in 0..10 {
                    d.emit(id, Event::token(format!("b{n}")));
                    tokio::task::yield_now().await;
                }
                d.complete(id);
                let _ = done_tx_b.send(());
                Ok(())
            },
            Some(handler_b),
            None,
        )
        .expect("submit b");

    done_rx.recv_timeout(WAIT).expect("first operation");
    done_rx.recv_timeout(WAIT).expect("second operation");
    dispatcher.drain();

    let seen_a = seen_a.lock();
    let seen_b = seen_b.lock();
    assert_eq!(seen_a.len(), 10);
    assert_eq!(seen_b.len(), 10);

    // Each handler only ever sees events tagged with its own id, in its
    // own emission order.
    for (n, (id, event)) in seen_a.iter().enumerate() {
        assert_eq!(*id, id_a);
        assert_eq!(*event, Event::token(format!("a{n}")));
    }
    for (n, (id, event)) in seen_b.iter().enumerate() {
        assert_eq!(*id, id_b);
        assert_eq!(*event, Event::token(format!("b{n}")));
    }
}

#[test]
fn stress_thousand_emits_in_order() {
    let (_runtime, dispatcher, wake_rx) = start();
    let (handler, seen) = recording_handler();

    dispatcher
        .submit(
            move |d, id| async move {
                for n in 0..1000u32 {
                    d.emit(id, Event::token(n.to_string()));
                }
                d.complete(id);
                Ok(())
            },
            Some(handler),
            None,
        )
        .expect("submit");

    let deadline = Instant::now() + WAIT;
    let mut delivered = 0;
    while delivered < 1000 {
        assert!(Instant::now() < deadline, "timed out at {delivered} events");
        let _ = wake_rx.recv_timeout(Duration::from_millis(50));
        delivered += dispatcher.drain();
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 1000);
    for (n, (_, event)) in seen.iter().enumerate() {
        assert_eq!(*event, Event::token(n.to_string()));
    }
}

#[test]
fn unknown_and_completed_ids_never_reach_a_handler() {
    let (_runtime, dispatcher, _wake_rx) = start();

    // Unknown id: dropped, no panic.
    dispatcher.emit(ConversationId::new(), Event::Done);
    dispatcher.complete(ConversationId::new());

    // Completed id: later emits dropped too.
    let (handler, seen) = recording_handler();
    let id = dispatcher.register_handler(None, handler);
    dispatcher.emit(id, Event::token("kept"));
    dispatcher.complete(id);
    dispatcher.emit(id, Event::token("dropped"));
    dispatcher.drain();

    let events: Vec<_> = seen.lock().iter().map(|(_, e)| e.clone()).collect();
    assert_eq!(events, vec![Event::token("kept")]);
}

#[test]
fn register_unregister_lookup_absent() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let id = dispatcher.register(None, |_, _| {});
    dispatcher.unregister(id);
    assert!(!dispatcher.is_registered(id));
}

#[test]
fn call_emits_single_result_and_completes() {
    let (_runtime, dispatcher, wake_rx) = start();
    let (handler, seen) = recording_handler();

    let id = dispatcher
        .call(
            || async { Ok(Event::token("the answer")) },
            handler,
            None,
        )
        .expect("call");

    wake_rx.recv_timeout(WAIT).expect("wake signal");
    dispatcher.drain();

    let events: Vec<_> = seen.lock().iter().map(|(_, e)| e.clone()).collect();
    assert_eq!(events, vec![Event::token("the answer")]);
    assert!(!dispatcher.is_registered(id));
}

#[test]
fn failing_operation_does_not_crash_the_scheduler() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    dispatcher
        .submit(
            |_, _| async { Err(anyhow::anyhow!("backend exploded")) },
            None,
            None,
        )
        .expect("submit failing op");

    // The scheduler must still run subsequent operations.
    dispatcher
        .submit(
            move |_, _| async move {
                let _ = done_tx.send(());
                Ok(())
            },
            None,
            None,
        )
        .expect("submit follow-up");

    done_rx.recv_timeout(WAIT).expect("scheduler still alive");
}

#[test]
fn panicking_handler_does_not_stop_the_drain() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let bad = Handler::new(|_, _| panic!("handler bug"));
    let (good, seen) = recording_handler();
    let bad_id = dispatcher.register_handler(None, bad);
    let good_id = dispatcher.register_handler(None, good);

    dispatcher
        .submit(
            move |d, _| async move {
                d.emit(bad_id, Event::Done);
                d.emit(good_id, Event::Done);
                let _ = done_tx.send(());
                Ok(())
            },
            None,
            None,
        )
        .expect("submit");

    done_rx.recv_timeout(WAIT).expect("operation ran");
    let delivered = dispatcher.drain();

    // Both entries were processed; the panic was contained.
    assert_eq!(delivered, 2);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn fire_and_forget_runs_and_discards() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    dispatcher.fire_and_forget(async move {
        let _ = done_tx.send(());
        Ok(())
    });

    done_rx.recv_timeout(WAIT).expect("side effect ran");
    assert_eq!(dispatcher.conversation_count(), 0);
}

#[test]
fn closed_dispatcher_rejects_submissions() {
    let (runtime, dispatcher, _wake_rx) = start();

    dispatcher.close();
    let result = dispatcher.submit(|_, _| async { Ok(()) }, None, None);
    assert!(matches!(result, Err(DispatchError::ShuttingDown)));

    runtime.shutdown(Duration::from_millis(100));
}

#[test]
fn abandoned_conversation_stops_mock_stream() {
    let (_runtime, dispatcher, _wake_rx) = start();
    let (handler, _seen) = recording_handler();
    let (done_tx, done_rx) = std::sync::mpsc::channel();

    let id = dispatcher.register_handler(None, handler);

    // Abandon before the producer gets a chance to emit anything.
    dispatcher.unregister(id);

    let probe = dispatcher.clone();
    dispatcher
        .submit(
            move |d, id| async move {
                mock::stream_mock_tokens(d, id, mock::mock_paragraph(5), Duration::ZERO).await?;
                let _ = done_tx.send(probe.pending_len());
                Ok(())
            },
            None,
            Some(id),
        )
        .expect("submit");

    let pending = done_rx.recv_timeout(WAIT).expect("producer returned");
    assert_eq!(pending, 0, "abandoned stream must not queue deliveries");
}

#[test]
fn foreground_context_identity() {
    let (_runtime, dispatcher, _wake_rx) = start();
    assert_eq!(dispatcher.current_context(), ExecutionContext::Foreground);
}

#[test]
fn streamed_generation_fills_tree_node() {
    let (_runtime, dispatcher, wake_rx) = start();

    let tree = Arc::new(Mutex::new(GenerationTree::new("Root text. ")));
    let child_id = GenerationId::new();
    {
        let mut tree = tree.lock();
        let root_id = tree.root_id();
        tree.add_pending_child(root_id, child_id).expect("add child");
    }

    // Correlate the conversation with the tree node by sharing the UUID.
    let conversation = ConversationId(child_id.0);
    let done = Arc::new(Mutex::new(false));

    let handler_tree = Arc::clone(&tree);
    let handler_done = Arc::clone(&done);
    let handler = Handler::new(move |_, event| match event {
        Event::Token { text } => {
            let _ = handler_tree.lock().append_text(child_id, &text);
        }
        Event::Done => {
            let _ = handler_tree
                .lock()
                .set_state(child_id, GenerationState::Generated);
            *handler_done.lock() = true;
        }
        Event::Error { .. } => *handler_done.lock() = true,
    });

    dispatcher
        .submit(
            move |d, id| {
                mock::stream_mock_tokens(d, id, mock::mock_paragraph(4), Duration::ZERO)
            },
            Some(handler),
            Some(conversation),
        )
        .expect("submit");

    let deadline = Instant::now() + WAIT;
    while !*done.lock() {
        assert!(Instant::now() < deadline, "generation timed out");
        let _ = wake_rx.recv_timeout(Duration::from_millis(50));
        dispatcher.drain();
    }

    let tree = tree.lock();
    let node = tree.get(child_id).expect("node exists");
    assert_eq!(node.text, "lorem ipsum dolor sit.");
    assert_eq!(node.state, GenerationState::Generated);
    assert!(!dispatcher.is_registered(conversation));
}
