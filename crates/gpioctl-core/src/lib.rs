//! gpioctl core - shared plumbing for the gpioctld daemon
//!
//! - `error` - the daemon's error taxonomy
//! - `config` - optional TOML configuration
//! - `logging` - the `<program> [<LEVEL>]: ` stderr log format
//!
//! No `.unwrap()`, `.expect()` or `panic!()` outside of tests.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{DaemonConfig, DEFAULT_MAX_EVENTS};
pub use error::{ConfigError, DaemonError, DaemonResult};
pub use logging::{program_name, DaemonFormat, LogInitError};
