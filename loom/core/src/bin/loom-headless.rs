//! Loom Headless
//!
//! Minimal headless driver for the dispatch core: starts the background
//! scheduler, streams a mock generation into a tree node, and drains on a
//! simulated foreground loop. Useful for exercising the runtime without a
//! UI toolkit attached.
//!
//! # Usage
//!
//! ```bash
//! # Mock mode (no backend needed)
//! MOCK=1 loom-headless
//!
//! # With verbose logging
//! RUST_LOG=debug MOCK=1 loom-headless
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use loom_core::{
    mock, BackgroundRuntime, ChannelWaker, Config, ConfigError, Event, GenerationId,
    GenerationState, GenerationTree, Handler,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loom_core=info".parse()?)
                .add_directive("loom_headless=info".parse()?),
        )
        .with_target(true)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingServerAddress) => {
            warn!("no SERVER_ADDR set; falling back to mock mode");
            Config {
                server_address: String::new(),
                debug: false,
                mock: true,
                mock_node_amount: None,
                generation: loom_core::GenerationSettings::llama_defaults(),
            }
        }
        Err(error) => return Err(error.into()),
    };

    if !config.mock {
        anyhow::bail!("only mock mode is wired up in the headless driver");
    }

    info!("starting background scheduler");
    let runtime = BackgroundRuntime::start()?;
    let (waker, wake_rx) = ChannelWaker::new();
    let dispatcher = runtime.dispatcher(waker);

    // Foreground-owned state: the tree the streamed tokens feed.
    let tree = Arc::new(Mutex::new(GenerationTree::new("Once upon a time, ")));
    let child_id = GenerationId::new();
    {
        let mut tree = tree.lock();
        let root_id = tree.root_id();
        tree.add_pending_child(root_id, child_id)?;
    }

    // Reuse the node's UUID as the conversation id so events correlate
    // straight back to the node.
    let conversation = loom_core::ConversationId(child_id.0);
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
        Event::Error { detail } => {
            warn!(generation_id = %child_id, detail = %detail, "generation failed");
            *handler_done.lock() = true;
        }
    });

    let words = mock::mock_paragraph(config.mock_node_amount.unwrap_or(20));
    dispatcher.submit(
        move |d, id| mock::stream_mock_tokens(d, id, words, Duration::from_millis(25)),
        Some(handler),
        Some(conversation),
    )?;

    // Foreground loop: drain on wake signals, and on a 200ms fallback
    // tick in case a wake is missed.
    while !*done.lock() {
        let _ = wake_rx.recv_timeout(Duration::from_millis(200));
        dispatcher.drain();
    }
    dispatcher.drain();

    let tree = tree.lock();
    let node = tree
        .get(child_id)
        .ok_or_else(|| anyhow::anyhow!("generated node missing from tree"))?;
    info!(generation_id = %child_id, text = %node.text, "generation complete");

    dispatcher.close();
    runtime.shutdown(Duration::from_secs(1));
    Ok(())
}
