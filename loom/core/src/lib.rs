//! Loom Core - Dispatch Runtime for Branching Text Exploration
//!
//! This crate provides the task/message dispatch core for loom, a desktop
//! tool that explores tree-structured text generated by a remote language
//! model: the user edits a node's text, requests a continuation, and a new
//! child node streams in token-by-token while the UI stays responsive.
//!
//! The crate is completely independent of any UI framework. It can drive a
//! desktop toolkit, a TUI, or run headless for testing.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    foreground thread (UI)                  │
//! │   handlers mutate the GenerationTree, redraw widgets       │
//! │                 ▲ drain()            │ submit()            │
//! └─────────────────┼────────────────────┼─────────────────────┘
//!            pending queue          Dispatcher
//!            + wake signal               │
//! ┌─────────────────┼────────────────────▼─────────────────────┐
//! │          background scheduler (tokio, one thread)          │
//! │   producer operations: stream tokens, emit(), complete()   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: the scheduling engine; submit operations, emit
//!   events, drain the foreground queue
//! - [`ConversationId`] / [`ConversationRegistry`]: one live handler per
//!   logical exchange
//! - [`Event`]: the tagged payload a producer streams to its handler
//! - [`BackgroundRuntime`] / [`Watchdog`]: the two-scheduler process model
//! - [`GenerationTree`]: the branching text model the events feed
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use loom_core::{BackgroundRuntime, ChannelWaker, Event, mock};
//!
//! let runtime = BackgroundRuntime::start().unwrap();
//! let (waker, wake_rx) = ChannelWaker::new();
//! let dispatcher = runtime.dispatcher(waker);
//!
//! // Submit a streaming operation with a foreground handler.
//! let handler = loom_core::Handler::new(|id, event| {
//!     if let Event::Token { text } = event {
//!         println!("{id}: {text}");
//!     }
//! });
//! dispatcher
//!     .submit(
//!         |d, id| mock::stream_mock_tokens(d, id, mock::mock_paragraph(20), Duration::ZERO),
//!         Some(handler),
//!         None,
//!     )
//!     .unwrap();
//!
//! // Foreground loop: drain on wake, and on a fallback tick.
//! loop {
//!     let _ = wake_rx.recv_timeout(Duration::from_millis(200));
//!     dispatcher.drain();
//!     # break;
//! }
//!
//! dispatcher.close();
//! runtime.shutdown(Duration::from_secs(1));
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod event;
pub mod mock;
pub mod runtime;
pub mod settings;
pub mod tree;

// Re-exports for convenience
pub use config::{default_config_path, Config, ConfigError};
pub use dispatch::{
    ConversationId, ConversationRegistry, DispatchError, Dispatcher, ExecutionContext, Handler,
};
pub use event::Event;
pub use runtime::{BackgroundRuntime, ChannelWaker, ForegroundWaker, NullWaker, Watchdog};
pub use settings::GenerationSettings;
pub use tree::{Generation, GenerationId, GenerationState, GenerationTree, TreeError};
