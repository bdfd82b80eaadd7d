//! Listener registry.
//!
//! The registry owns every live [`Listener`] in insertion order. A listener is
//! a member if and only if its descriptor is in the dispatcher's interest set:
//! `add` only stores a listener once registration has succeeded, and
//! `teardown_all` deregisters each one before releasing it.
//!
//! The [`Token`] handed to the dispatcher is the listener's slot index. Slots
//! are never reused while the registry is live because there is no
//! single-listener removal, only bulk teardown.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()` or direct indexing
//! - A rejected listener is returned to the caller rather than dropped

use std::os::fd::{AsFd, RawFd};

use gpioctl_core::DaemonError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, Token};
use crate::listener::Listener;

/// A listener that could not be registered, handed back to the caller.
#[derive(Error, Debug)]
#[error("listener `{}` rejected", .listener.name())]
pub struct Rejected {
    /// The listener, still owning its descriptor.
    pub listener: Listener,

    /// Why registration failed.
    #[source]
    pub error: DaemonError,
}

impl Rejected {
    /// Drops the listener (closing its descriptor) and keeps the error.
    pub fn into_error(self) -> DaemonError {
        self.listener.release();
        self.error
    }
}

/// Ordered collection of registered listeners.
#[derive(Debug, Default)]
pub struct Registry {
    listeners: Vec<Listener>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` with `dispatcher` and stores it.
    ///
    /// # Errors
    ///
    /// `Rejected` if the dispatcher refuses the descriptor. The listener is
    /// not stored and ownership goes back to the caller.
    pub fn add(&mut self, dispatcher: &mut Dispatcher, listener: Listener) -> Result<Token, Rejected> {
        let token = Token(self.listeners.len() as u64);
        let fd = listener.raw_fd();

        if let Err(error) = dispatcher.register(listener.as_fd(), token) {
            return Err(Rejected {
                listener,
                error: DaemonError::Register { fd, error },
            });
        }

        debug!(fd, name = listener.name(), token = token.0, "listener added");
        self.listeners.push(listener);
        Ok(token)
    }

    /// Listener registered under `token`.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut Listener> {
        usize::try_from(token.0)
            .ok()
            .and_then(|index| self.listeners.get_mut(index))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Whether a listener owns `fd`.
    pub fn contains_fd(&self, fd: RawFd) -> bool {
        self.listeners.iter().any(|listener| listener.raw_fd() == fd)
    }

    /// Deregisters and releases every listener, in insertion order.
    ///
    /// Each listener's event source is dropped before its descriptor is
    /// closed. Returns the number of listeners released.
    pub fn teardown_all(&mut self, dispatcher: &mut Dispatcher) -> usize {
        let mut released = 0;

        for listener in self.listeners.drain(..) {
            let fd = listener.raw_fd();
            if let Err(e) = dispatcher.deregister(listener.as_fd()) {
                warn!(fd, error = %e, "failed to remove fd from epoll interest set");
            }

            debug!(fd, name = listener.name(), "releasing listener");
            listener.release();
            released += 1;
        }

        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{Action, EventSource};
    use std::cell::RefCell;
    use std::io::{ErrorKind, Read};
    use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;
    use std::time::Duration;

    /// Appends its id to a shared log when dropped.
    struct Tracked {
        id: usize,
        dropped: Rc<RefCell<Vec<usize>>>,
    }

    impl EventSource for Tracked {
        fn handle(&mut self, _fd: BorrowedFd<'_>) -> Action {
            Action::Continue
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.borrow_mut().push(self.id);
        }
    }

    fn tracked_listener(id: usize, dropped: &Rc<RefCell<Vec<usize>>>) -> (Listener, UnixStream) {
        let (reader, peer) = UnixStream::pair().unwrap();
        let listener = Listener::new(
            OwnedFd::from(reader),
            Tracked {
                id,
                dropped: Rc::clone(dropped),
            },
        );
        (listener, peer)
    }

    fn assert_peer_closed(peer: &mut UnixStream) {
        peer.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0, "listener fd still open");
    }

    #[test]
    fn test_add_assigns_sequential_tokens() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let mut registry = Registry::new();
        let dropped = Rc::new(RefCell::new(Vec::new()));

        let mut peers = Vec::new();
        for id in 0..3 {
            let (listener, peer) = tracked_listener(id, &dropped);
            let fd = listener.raw_fd();
            let token = registry.add(&mut dispatcher, listener).unwrap();

            assert_eq!(token, Token(id as u64));
            assert!(registry.contains_fd(fd));
            assert!(dispatcher.is_registered(fd));
            peers.push(peer);
        }

        assert_eq!(registry.len(), 3);
        assert!(registry.get_mut(Token(2)).is_some());
        assert!(registry.get_mut(Token(3)).is_none());
    }

    #[test]
    fn test_teardown_releases_everything_once() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let mut registry = Registry::new();
        let dropped = Rc::new(RefCell::new(Vec::new()));

        let mut peers = Vec::new();
        for id in 0..5 {
            let (listener, peer) = tracked_listener(id, &dropped);
            registry.add(&mut dispatcher, listener).unwrap();
            peers.push(peer);
        }

        assert_eq!(registry.teardown_all(&mut dispatcher), 5);
        assert!(registry.is_empty());
        assert_eq!(dispatcher.interest_len(), 0);
        assert_eq!(*dropped.borrow(), vec![0, 1, 2, 3, 4]);

        for peer in &mut peers {
            assert_peer_closed(peer);
        }

        // A second pass has nothing left to release.
        assert_eq!(registry.teardown_all(&mut dispatcher), 0);
        assert_eq!(dropped.borrow().len(), 5);
    }

    #[test]
    fn test_teardown_with_no_listeners() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let mut registry = Registry::new();

        assert_eq!(registry.teardown_all(&mut dispatcher), 0);
    }

    #[test]
    fn test_rejected_listener_not_stored() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let mut registry = Registry::new();

        // Regular files cannot be polled, so epoll_ctl fails with EPERM.
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let listener = Listener::new(OwnedFd::from(file), |_: BorrowedFd<'_>| Action::Continue);

        let rejected = registry.add(&mut dispatcher, listener).unwrap_err();

        assert!(registry.is_empty());
        assert!(!registry.contains_fd(fd));
        assert!(!dispatcher.is_registered(fd));
        assert_eq!(rejected.listener.raw_fd(), fd);
        match &rejected.error {
            DaemonError::Register { fd: err_fd, error } => {
                assert_eq!(*err_fd, fd);
                assert_eq!(error.kind(), ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejection_keeps_earlier_listeners() {
        let mut dispatcher = Dispatcher::new().unwrap();
        let mut registry = Registry::new();
        let dropped = Rc::new(RefCell::new(Vec::new()));

        let (good, _peer) = tracked_listener(0, &dropped);
        registry.add(&mut dispatcher, good).unwrap();

        let file = tempfile::tempfile().unwrap();
        let bad = Listener::new(
            OwnedFd::from(file),
            Tracked {
                id: 1,
                dropped: Rc::clone(&dropped),
            },
        );
        let err = registry.add(&mut dispatcher, bad).unwrap_err().into_error();

        assert!(matches!(err, DaemonError::Register { .. }));
        assert_eq!(*dropped.borrow(), vec![1]);
        assert_eq!(registry.len(), 1);
        assert_eq!(dispatcher.interest_len(), 1);

        // The next accepted listener takes the next free slot.
        let (next, _peer2) = tracked_listener(2, &dropped);
        assert_eq!(registry.add(&mut dispatcher, next).unwrap(), Token(1));
    }
}
