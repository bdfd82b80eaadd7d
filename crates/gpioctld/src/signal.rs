//! Signal bridge: process signals as readable data.
//!
//! The termination signals are blocked and routed to a `signalfd`, which the
//! dispatcher polls like any other descriptor. No asynchronous handler ever
//! runs, so nothing in the daemon executes concurrently with the loop.
//!
//! The mask is installed *before* the signalfd is created. A SIGINT arriving
//! in between stays pending and is read from the descriptor instead of
//! killing the process.
//!
//! # Record decoding
//!
//! | read result               | effect                                  |
//! |---------------------------|-----------------------------------------|
//! | read error                | error logged, no state change           |
//! | `EAGAIN`                  | debug logged, no state change           |
//! | short/long record         | error logged, no state change           |
//! | SIGINT / SIGTERM          | info logged, [`Action::Stop`]           |
//! | any other signal          | one warning logged, no state change     |

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::ptr;

use gpioctl_core::{DaemonError, DaemonResult};
use libc::c_int;
use tracing::{debug, error, info, warn};

use crate::listener::{Action, EventSource, Listener};

/// Size of one record read from a signalfd.
pub const SIGINFO_SIZE: usize = mem::size_of::<libc::signalfd_siginfo>();

/// Signals that request a graceful shutdown.
pub const TERMINATION_SIGNALS: [c_int; 2] = [libc::SIGINT, libc::SIGTERM];

/// Human-readable name for the signals the daemon is likely to see.
pub fn signal_name(signo: c_int) -> &'static str {
    match signo {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGCHLD => "SIGCHLD",
        _ => "unknown",
    }
}

// ============================================================================
// SignalSet
// ============================================================================

/// A set of signals to route through the bridge.
#[derive(Clone)]
pub struct SignalSet {
    set: libc::sigset_t,
    signals: Vec<c_int>,
}

impl SignalSet {
    /// SIGINT and SIGTERM.
    pub fn termination() -> io::Result<Self> {
        Self::new(&TERMINATION_SIGNALS)
    }

    /// Builds a set from signal numbers.
    ///
    /// # Errors
    ///
    /// `EINVAL` if a number is not a valid signal.
    pub fn new(signals: &[c_int]) -> io::Result<Self> {
        // SAFETY: sigset_t is plain data; sigemptyset initialises it.
        let mut set: libc::sigset_t = unsafe { mem::zeroed() };
        if unsafe { libc::sigemptyset(&mut set) } < 0 {
            return Err(io::Error::last_os_error());
        }

        for &signo in signals {
            if unsafe { libc::sigaddset(&mut set, signo) } < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(Self {
            set,
            signals: signals.to_vec(),
        })
    }

    pub fn contains(&self, signo: c_int) -> bool {
        self.signals.contains(&signo)
    }

    /// Blocks the set so its signals are only delivered through a signalfd.
    ///
    /// The daemon is single-threaded, so the calling thread's mask is the
    /// process mask.
    pub fn block(&self) -> io::Result<()> {
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &self.set, ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.signals.iter().map(|&signo| signal_name(signo)))
            .finish()
    }
}

// ============================================================================
// Bridge setup
// ============================================================================

/// Blocks `signals` and returns a listener reading them from a signalfd.
///
/// # Errors
///
/// - `DaemonError::SignalMask` if the mask cannot be installed
/// - `DaemonError::SignalFd` if the signalfd cannot be created
pub fn setup(signals: &SignalSet) -> DaemonResult<Listener> {
    signals.block().map_err(DaemonError::SignalMask)?;

    let raw = unsafe { libc::signalfd(-1, &signals.set, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC) };
    if raw < 0 {
        return Err(DaemonError::SignalFd(io::Error::last_os_error()));
    }

    // SAFETY: signalfd returned a fresh descriptor we now own.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    debug!(fd = raw, signals = ?signals, "signalfd created");

    Ok(Listener::new(fd, SignalHandler::new()))
}

// ============================================================================
// SignalHandler
// ============================================================================

/// Decodes signalfd records into loop actions.
#[derive(Debug, Default)]
pub struct SignalHandler {
    received: u64,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of well-formed records decoded so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Interprets one record as read from the descriptor.
    pub fn decode(&mut self, record: &[u8]) -> Action {
        let Some(signo) = signo_from_record(record) else {
            error!(
                size = record.len(),
                expected = SIGINFO_SIZE,
                "invalid size of signal info"
            );
            return Action::Continue;
        };

        self.received += 1;
        if TERMINATION_SIGNALS.contains(&signo) {
            info!(signal = signal_name(signo), "signal received - terminating");
            Action::Stop
        } else {
            warn!(signo, "unexpected signal caught");
            Action::Continue
        }
    }
}

impl EventSource for SignalHandler {
    fn handle(&mut self, fd: BorrowedFd<'_>) -> Action {
        let mut record = [0u8; SIGINFO_SIZE];
        let rd = unsafe { libc::read(fd.as_raw_fd(), record.as_mut_ptr().cast(), record.len()) };

        if rd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                debug!("signalfd woke up with nothing to read");
            } else {
                error!(error = %err, "error reading signal info");
            }
            return Action::Continue;
        }

        let len = usize::try_from(rd).unwrap_or(0).min(record.len());
        self.decode(record.get(..len).unwrap_or(&[]))
    }

    fn name(&self) -> &str {
        "signalfd"
    }
}

/// Extracts `ssi_signo` from a complete record.
fn signo_from_record(record: &[u8]) -> Option<c_int> {
    if record.len() != SIGINFO_SIZE {
        return None;
    }

    // ssi_signo is the leading u32 of struct signalfd_siginfo.
    let bytes: [u8; 4] = record.get(..4)?.try_into().ok()?;
    c_int::try_from(u32::from_ne_bytes(bytes)).ok()
}
