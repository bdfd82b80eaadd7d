//! epoll-based readiness multiplexer.
//!
//! Every event source is reduced to "this descriptor became readable". The
//! dispatcher never needs to know whether a descriptor is a signalfd, a GPIO
//! line event handle or something else.
//!
//! # Lifecycle
//!
//! ```text
//! Dispatcher::new()  ──▶  register()/deregister()/wait() ...  ──▶  destroy()
//! (epoll_create1)                                                (close)
//! ```
//!
//! `destroy` consumes the dispatcher, so the handle cannot be used after it
//! has been released.

use std::collections::HashSet;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use gpioctl_core::{DaemonError, DaemonResult};
use tracing::debug;

/// Interest mask used for every registration.
const READ_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLPRI) as u32;

/// Opaque tag attached to a registration and returned on readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

// ============================================================================
// Events
// ============================================================================

/// Buffer receiving readiness results from [`Dispatcher::wait`].
///
/// Its capacity is the upper bound on events returned per wait.
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    /// Creates a buffer for up to `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity],
            len: 0,
        }
    }

    /// Maximum events per wait.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of events filled in by the last wait.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Tokens of the ready registrations, in the order the kernel reported.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.buf
            .iter()
            .take(self.len)
            .map(|event| Token(event.u64))
    }

    fn clear(&mut self) {
        self.len = 0;
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Owner of the epoll handle and its interest set.
#[derive(Debug)]
pub struct Dispatcher {
    epoll: OwnedFd,
    interest: HashSet<RawFd>,
}

impl Dispatcher {
    /// Acquires a new epoll instance.
    ///
    /// # Errors
    ///
    /// `DaemonError::EpollCreate` if the kernel refuses the allocation.
    pub fn new() -> DaemonResult<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(DaemonError::EpollCreate(io::Error::last_os_error()));
        }

        // SAFETY: epoll_create1 returned a fresh descriptor we now own.
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        debug!(fd = raw, "epoll instance created");

        Ok(Self {
            epoll,
            interest: HashSet::new(),
        })
    }

    /// Adds `fd` to the interest set for readable or priority data.
    ///
    /// # Errors
    ///
    /// Whatever `epoll_ctl(EPOLL_CTL_ADD)` reports: `EPERM` for descriptors
    /// that do not support polling, `EEXIST` for duplicates, `ENOSPC` or
    /// `ENOMEM` on exhaustion.
    pub fn register(&mut self, fd: BorrowedFd<'_>, token: Token) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: READ_INTEREST,
            u64: token.0,
        };

        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                fd.as_raw_fd(),
                &mut event,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        self.interest.insert(fd.as_raw_fd());
        debug!(fd = fd.as_raw_fd(), token = token.0, "fd registered");
        Ok(())
    }

    /// Removes `fd` from the interest set.
    pub fn deregister(&mut self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd.as_raw_fd(),
                ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        self.interest.remove(&fd.as_raw_fd());
        Ok(())
    }

    /// Blocks until a registered descriptor is ready, the timeout expires or
    /// an error occurs.
    ///
    /// `None` blocks indefinitely. Returns the number of ready events stored
    /// in `events`, which may be zero after a timeout. `EINTR` is retried;
    /// any other error is returned and should end the loop.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout_to_millis(timeout);
        events.clear();

        loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.buf.as_mut_ptr(),
                    events.buf.len().min(libc::c_int::MAX as usize) as libc::c_int,
                    timeout_ms,
                )
            };

            if n >= 0 {
                events.len = n as usize;
                return Ok(events.len);
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
            debug!("epoll_wait() interrupted, retrying");
        }
    }

    /// Whether `fd` is currently in the interest set.
    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.interest.contains(&fd)
    }

    /// Number of descriptors in the interest set.
    pub fn interest_len(&self) -> usize {
        self.interest.len()
    }

    /// Releases the epoll handle.
    pub fn destroy(self) {
        if !self.interest.is_empty() {
            debug!(
                remaining = self.interest.len(),
                "destroying epoll instance with registered fds"
            );
        }
        debug!(fd = self.epoll.as_raw_fd(), "epoll instance destroyed");
        drop(self.epoll);
    }
}

/// Converts an optional timeout to `epoll_wait()` milliseconds, rounding up so
/// that short non-zero timeouts do not turn into busy polling.
fn timeout_to_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(duration) => {
            let mut millis = duration.as_millis();
            if duration.subsec_nanos() % 1_000_000 != 0 {
                millis += 1;
            }
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
