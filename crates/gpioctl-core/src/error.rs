//! Error taxonomy for the daemon.
//!
//! Startup failures (`EpollCreate`, `SignalMask`, `SignalFd`, `Register`)
//! abort the process with a diagnostic. `Wait` is the only runtime failure;
//! the event loop logs it and turns it into a stop request so that registered
//! resources are still released.
//!
//! Each message already carries its underlying OS or parse error, so none of
//! these types expose it again through `Error::source()`. A cause chain
//! printed with `{:#}` names every cause once.

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while bringing up or running the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The epoll instance could not be allocated.
    #[error("error creating epoll instance: {0}")]
    EpollCreate(io::Error),

    /// The termination signals could not be blocked.
    #[error("unable to init signal mask: {0}")]
    SignalMask(io::Error),

    /// The signalfd descriptor could not be created.
    #[error("unable to setup signalfd: {0}")]
    SignalFd(io::Error),

    /// A listener descriptor could not be added to the interest set.
    #[error("unable to add listener for fd {fd}: {error}")]
    Register { fd: RawFd, error: io::Error },

    /// `epoll_wait()` failed after startup.
    #[error("epoll_wait() failure: {0}")]
    Wait(io::Error),
}

/// Errors raised while loading or validating the daemon configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {}: {error}", path.display())]
    Read { path: PathBuf, error: io::Error },

    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse config file {}: {error}", path.display())]
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },

    /// A field holds a value outside its accepted range.
    #[error("invalid {field}: {value} (expected {expected})")]
    Invalid {
        field: &'static str,
        value: String,
        expected: String,
    },
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
