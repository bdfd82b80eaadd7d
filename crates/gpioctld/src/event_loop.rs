//! The main loop and its shutdown protocol.
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            │               RUNNING                │
//!            │  wait() ─▶ dispatch ready listeners  │
//!            │     ▲      (stop checked after each) │
//!            │     └──────────────┘                 │
//!            └───────┬──────────────────┬───────────┘
//!        stop flag set│                  │wait() failed
//!                     ▼                  ▼
//!            ┌──────────────────────────────────────┐
//!            │ STOPPING: teardown_all ▶ destroy()   │
//!            └──────────────────────────────────────┘
//! ```
//!
//! STOPPING is terminal. When a callback requests a stop, events that were
//! already reported ready in the same pass are dropped, not re-queued.

use std::time::Duration;

use gpioctl_core::{DaemonConfig, DaemonError, DaemonResult};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, Events, Token};
use crate::listener::{Action, Listener};
use crate::registry::{Registry, Rejected};
use crate::signal::{self, SignalSet};

// ============================================================================
// Stop flag
// ============================================================================

/// One-way shutdown latch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopFlag {
    stopped: bool,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. Returns `true` only for the call that set it.
    pub fn request(&mut self) -> bool {
        let first = !self.stopped;
        self.stopped = true;
        first
    }

    pub fn is_set(&self) -> bool {
        self.stopped
    }
}

/// Why the loop left RUNNING.
#[derive(Debug)]
pub enum StopReason {
    /// A listener (usually the signal bridge) asked to stop.
    Requested,
    /// `epoll_wait()` failed; treated as a stop request.
    WaitFailed(DaemonError),
}

/// Outcome of a completed run.
#[derive(Debug)]
pub struct Shutdown {
    pub reason: StopReason,
    /// Listeners released during teardown.
    pub released: usize,
}

impl Shutdown {
    pub fn is_clean(&self) -> bool {
        matches!(self.reason, StopReason::Requested)
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Owns the dispatcher, the registry and the stop flag.
pub struct EventLoop {
    dispatcher: Dispatcher,
    registry: Registry,
    events: Events,
    timeout: Option<Duration>,
    stop: StopFlag,
}

impl EventLoop {
    /// Creates the epoll instance and an empty registry.
    ///
    /// `max_events` and `wait_timeout_ms` are taken as given; call
    /// [`DaemonConfig::validate`] first for untrusted input.
    pub fn new(config: &DaemonConfig) -> DaemonResult<Self> {
        let dispatcher = Dispatcher::new()?;

        Ok(Self {
            dispatcher,
            registry: Registry::new(),
            events: Events::with_capacity(config.max_events),
            timeout: config.wait_timeout(),
            stop: StopFlag::new(),
        })
    }

    /// Registers a listener.
    ///
    /// # Errors
    ///
    /// `Rejected` with the listener handed back if epoll refuses it.
    pub fn add_listener(&mut self, listener: Listener) -> Result<Token, Rejected> {
        self.registry.add(&mut self.dispatcher, listener)
    }

    /// Blocks `signals` and registers the signalfd listener.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal at startup: `SignalMask`, `SignalFd` or
    /// `Register`.
    pub fn install_signal_bridge(&mut self, signals: &SignalSet) -> DaemonResult<Token> {
        let listener = signal::setup(signals)?;
        let token = self.add_listener(listener).map_err(Rejected::into_error)?;
        debug!(token = token.0, "signal bridge installed");
        Ok(token)
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Sets the stop flag; the loop stops after the current callback.
    pub fn request_stop(&mut self) {
        if self.stop.request() {
            debug!("stop requested");
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_set()
    }

    /// Runs one wait and dispatches the ready listeners.
    ///
    /// Returns the number of callbacks invoked. The pass ends early once the
    /// stop flag is set; the rest of the batch is dropped.
    ///
    /// # Errors
    ///
    /// `DaemonError::Wait` if `epoll_wait()` fails.
    pub fn dispatch_once(&mut self) -> DaemonResult<usize> {
        let ready = self
            .dispatcher
            .wait(&mut self.events, self.timeout)
            .map_err(DaemonError::Wait)?;

        let mut dispatched = 0;
        for (index, token) in self.events.tokens().enumerate() {
            let Some(listener) = self.registry.get_mut(token) else {
                warn!(token = token.0, "readiness reported for unknown listener");
                continue;
            };

            dispatched += 1;
            if listener.dispatch() == Action::Stop && self.stop.request() {
                debug!(fd = listener.raw_fd(), name = listener.name(), "listener requested stop");
            }

            if self.stop.is_set() {
                let dropped = ready.saturating_sub(index + 1);
                if dropped > 0 {
                    debug!(dropped, "stopping mid-pass, remaining events dropped");
                }
                break;
            }
        }

        Ok(dispatched)
    }

    /// Dispatches until stopped, then tears everything down.
    ///
    /// The stop flag is checked before every wait, so a stop requested
    /// before `run` skips straight to teardown.
    pub fn run(mut self) -> Shutdown {
        info!(listeners = self.registry.len(), "entering main loop");

        let reason = loop {
            if self.stop.is_set() {
                break StopReason::Requested;
            }

            if let Err(e) = self.dispatch_once() {
                error!(error = %e, "main loop aborted");
                self.stop.request();
                break StopReason::WaitFailed(e);
            }
        };

        self.shutdown(reason)
    }

    /// Releases every listener, then the epoll handle.
    fn shutdown(self, reason: StopReason) -> Shutdown {
        let EventLoop {
            mut dispatcher,
            mut registry,
            ..
        } = self;

        let released = registry.teardown_all(&mut dispatcher);
        dispatcher.destroy();
        debug!(released, "teardown complete");

        Shutdown { reason, released }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("registry", &self.registry)
            .field("max_events", &self.events.capacity())
            .field("timeout", &self.timeout)
            .field("stop", &self.stop)
            .finish()
    }
}
