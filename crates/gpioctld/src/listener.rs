//! Listeners bind one readable descriptor to the code that services it.
//!
//! A [`Listener`] owns its descriptor and its [`EventSource`]. Anything the
//! source holds (a decoded line handle, a buffer, a chip) is released by the
//! source's `Drop`, so there is no separate destructor to remember.
//!
//! Release order is fixed: the event source is dropped first, then the
//! descriptor is closed. Ownership guarantees each happens exactly once.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// What the loop should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep dispatching.
    Continue,
    /// Request a graceful shutdown.
    Stop,
}

/// Something that can service a readable descriptor.
///
/// Callbacks never return errors to the loop: a source logs its own failures
/// and decides whether they warrant [`Action::Stop`].
pub trait EventSource {
    /// Called when `fd` is readable or has priority data.
    fn handle(&mut self, fd: BorrowedFd<'_>) -> Action;

    /// Short name used in log messages.
    fn name(&self) -> &str {
        "listener"
    }
}

impl<F> EventSource for F
where
    F: FnMut(BorrowedFd<'_>) -> Action,
{
    fn handle(&mut self, fd: BorrowedFd<'_>) -> Action {
        self(fd)
    }
}

/// A registered descriptor together with its event source.
pub struct Listener {
    fd: OwnedFd,
    source: Box<dyn EventSource>,
}

impl Listener {
    /// Creates a listener taking ownership of `fd` and `source`.
    pub fn new(fd: OwnedFd, source: impl EventSource + 'static) -> Self {
        Self {
            fd,
            source: Box::new(source),
        }
    }

    /// The descriptor's raw number.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Name of the event source.
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Invokes the event source with this listener's descriptor.
    pub fn dispatch(&mut self) -> Action {
        self.source.handle(self.fd.as_fd())
    }

    /// Releases the event source, then closes the descriptor.
    pub fn release(self) {
        let Listener { fd, source } = self;
        drop(source);
        drop(fd);
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("fd", &self.raw_fd())
            .field("source", &self.name())
            .finish()
    }
}
