// SPDX-License-Identifier: GPL-3.0-only
//! Background loop threads for native backends
//!
//! V4L2 capture readers and the hot-plug poller each drive a closure on a
//! named thread until the closure asks to stop or the owner cancels it.
//! Dropping a [`LoopController`] cancels and joins; [`LoopController::detach`]
//! cancels without waiting.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// What the loop body wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Owner of one loop thread
///
/// # Example
///
/// ```ignore
/// let poller = LoopController::start("v4l2-hotplug", move || {
///     if nodes_changed() {
///         notifier.notify();
///     }
///     LoopAction::Continue
/// })?;
///
/// // Cancels and joins
/// drop(poller);
/// ```
pub struct LoopController {
    handle: Option<JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    name: String,
}

impl LoopController {
    /// Run `body` on a new thread until it returns [`LoopAction::Stop`]
    pub fn start<F>(name: &str, mut body: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, || Ok(()), move |_: &mut ()| body())
    }

    /// Run `init` once on the new thread, then `body` against its state
    ///
    /// The state is created and dropped on the loop thread, so it need not
    /// be `Send`. When `init` fails the thread exits without looping.
    pub fn start_with_init<S, I, F>(name: &str, init: I, mut body: F) -> io::Result<Self>
    where
        S: 'static,
        I: FnOnce() -> Result<S, String> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_cancelled = Arc::clone(&cancelled);
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Loop initialization failed");
                        return;
                    }
                };

                while !thread_cancelled.load(Ordering::SeqCst) {
                    if body(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop finished");
                        return;
                    }
                }
                debug!(name = %thread_name, "Loop cancelled");
            })?;

        debug!(name, "Loop thread spawned");
        Ok(Self {
            handle: Some(handle),
            cancelled,
            name: name.to_string(),
        })
    }

    /// Whether the thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to stop after the current iteration
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the thread to exit on its own
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!(name = %self.name, "Loop thread panicked");
        }
    }

    /// Cancel and let the thread wind down without waiting for it
    ///
    /// For owners that may hold a lock the loop body is blocked on.
    pub fn detach(mut self) {
        self.cancel();
        if self.handle.take().is_some() {
            debug!(name = %self.name, "Loop thread detached");
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            self.join();
        }
    }
}
