//! Two-Scheduler Runtime
//!
//! The process runs exactly two logical execution contexts: a
//! current-thread tokio runtime on a dedicated native thread for all
//! background I/O (the cooperative scheduler producer operations run on),
//! and the foreground thread owned by the UI toolkit. They communicate
//! only through the dispatcher's registry and pending queue, never
//! through shared-memory shortcuts.
//!
//! A third, auxiliary thread (the [`Watchdog`]) may exist purely to wake
//! the foreground periodically as a fallback against missed wake signals;
//! it performs no application logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

/// The single primitive the dispatcher requires from the UI toolkit:
/// "wake the foreground thread soon".
///
/// Implementations post a toolkit event, signal a channel, whatever gets
/// the foreground owner to call [`Dispatcher::drain`] shortly. Must be
/// callable from any thread. Wakes may be coalesced or even missed, which
/// is why the foreground also drains on a periodic fallback tick.
pub trait ForegroundWaker: Send + Sync {
    /// Request that the foreground thread drain soon.
    fn wake(&self);
}

/// Waker that does nothing. For headless runs that drain on a timer only.
pub struct NullWaker;

impl ForegroundWaker for NullWaker {
    fn wake(&self) {}
}

/// Waker backed by a channel; the foreground blocks on the receiver with
/// a timeout (its fallback tick) and drains on every message.
pub struct ChannelWaker {
    tx: std::sync::mpsc::Sender<()>,
}

impl ChannelWaker {
    /// Create the waker and the receiver the foreground loop waits on.
    #[must_use]
    pub fn new() -> (Arc<Self>, std::sync::mpsc::Receiver<()>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ForegroundWaker for ChannelWaker {
    fn wake(&self) {
        // Receiver gone means the foreground loop already exited.
        let _ = self.tx.send(());
    }
}

/// The background scheduler: a current-thread tokio runtime running on a
/// dedicated, named native thread.
///
/// Producer operations are spawned onto it from any thread via the
/// dispatcher; they suspend at network I/O boundaries and must not hold
/// any lock across a suspension point.
pub struct BackgroundRuntime {
    handle: Handle,
    thread_id: ThreadId,
    shutdown_tx: Option<oneshot::Sender<Duration>>,
    join: Option<JoinHandle<()>>,
}

impl BackgroundRuntime {
    /// Build the runtime and start its scheduler thread.
    pub fn start() -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<Duration>();

        let join = std::thread::Builder::new()
            .name("loom-background".to_string())
            .spawn(move || {
                info!("background scheduler running");
                // block_on drives every task spawned via the handle; it
                // returns once shutdown is requested (or the runtime
                // owner was dropped, which reads as a zero grace period).
                let grace = runtime
                    .block_on(async move { shutdown_rx.await.unwrap_or(Duration::ZERO) });
                if !grace.is_zero() {
                    // Keep the scheduler running so in-flight operations
                    // can finish, up to the grace deadline.
                    debug!(
                        grace_ms = grace.as_millis() as u64,
                        "draining in-flight operations"
                    );
                    let deadline = std::time::Instant::now() + grace;
                    let metrics = runtime.handle().metrics();
                    runtime.block_on(async {
                        while metrics.num_alive_tasks() > 0 {
                            if std::time::Instant::now() >= deadline {
                                warn!(
                                    remaining = metrics.num_alive_tasks(),
                                    "grace period elapsed; cancelling remaining operations"
                                );
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    });
                }
                runtime.shutdown_timeout(Duration::ZERO);
                info!("background scheduler stopped");
            })?;

        let thread_id = join.thread().id();
        Ok(Self {
            handle,
            thread_id,
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Handle for spawning onto the scheduler.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Native identity of the scheduler thread.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Build a dispatcher bound to this runtime.
    #[must_use]
    pub fn dispatcher(&self, waker: Arc<dyn ForegroundWaker>) -> Dispatcher {
        Dispatcher::new(self.handle(), self.thread_id, waker)
    }

    /// Graceful shutdown: give in-flight operations up to `grace` to
    /// finish, then force-terminate the rest and join the thread.
    ///
    /// Close the dispatcher first so no new submissions race the
    /// shutdown. Blocks for at most roughly `grace`.
    pub fn shutdown(mut self, grace: Duration) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(grace);
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("background scheduler thread panicked during shutdown");
            }
        }
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        // Dropped without an explicit shutdown: stop immediately.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(Duration::ZERO);
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Auxiliary ticker that wakes the foreground on a fixed interval.
///
/// Robustness fallback against platform event-delivery quirks: even if a
/// wake signal is missed, the foreground still drains within one interval.
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Default fallback tick.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

    /// Start the ticker thread.
    pub fn start(waker: Arc<dyn ForegroundWaker>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let join = std::thread::Builder::new()
            .name("loom-watchdog".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    waker.wake();
                }
                debug!("watchdog stopped");
            })?;

        Ok(Self {
            stop,
            join: Some(join),
        })
    }

    /// Stop the ticker and join its thread.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.halt();
    }
}
