//! Log output for the daemon.
//!
//! Every event is written to stderr as a single line:
//!
//! ```text
//! gpioctld [ INFO]: signal received - terminating signal="SIGINT"
//! gpioctld [ WARN]: unexpected signal caught signo=10
//! ```
//!
//! The level is right-aligned to five characters. `TRACE` folds into `DEBUG`
//! since the daemon only distinguishes four severities.

use std::env;
use std::fmt;
use std::path::Path;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::parse_level_filter;
use crate::error::ConfigError;

/// Fallback when argv[0] is unavailable.
pub const DEFAULT_PROGRAM_NAME: &str = "gpioctld";

/// Returns the program name as invoked, without its directory.
pub fn program_name() -> String {
    env::args_os()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_PROGRAM_NAME)
        .to_string()
}

/// Fixed-width label for a level.
pub fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => " WARN",
        Level::INFO => " INFO",
        Level::DEBUG | Level::TRACE => "DEBUG",
    }
}

// ============================================================================
// Event formatter
// ============================================================================

/// Formats events as `<program> [<LEVEL>]: <message> <fields>`.
#[derive(Debug, Clone)]
pub struct DaemonFormat {
    program: String,
}

impl DaemonFormat {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for DaemonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} [{}]: ",
            self.program,
            level_label(event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ============================================================================
// Initialisation
// ============================================================================

/// Errors raised while installing the global subscriber.
#[derive(thiserror::Error, Debug)]
pub enum LogInitError {
    /// The default level did not parse.
    #[error(transparent)]
    Level(#[from] ConfigError),

    /// A global subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Installs the stderr subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` applies to every
/// target.
pub fn init(program: &str, default_level: &str) -> Result<(), LogInitError> {
    let level = parse_level_filter(default_level)?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter)
        .event_format(DaemonFormat::new(program))
        .try_init()
        .map_err(|e| LogInitError::Install(e.to_string()))
}
