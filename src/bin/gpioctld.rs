//! gpioctld - daemon controlling GPIOs via the character device
//!
//! Runs in the foreground, multiplexing every event source through a single
//! epoll loop until SIGINT or SIGTERM arrives.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon
//! gpioctld
//!
//! # Start with a config file
//! gpioctld --config /etc/gpioctld.toml
//! GPIOCTLD_CONFIG=/etc/gpioctld.toml gpioctld
//!
//! # Enable debug logging
//! RUST_LOG=debug gpioctld
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, exit status 0
//! - Anything else routed to the signalfd: logged and ignored

use std::path::PathBuf;
use std::process::{self, ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;

use gpioctl_core::{logging, program_name, DaemonConfig};
use gpioctld::{EventLoop, SignalSet, StopReason};

/// gpioctld - daemon multiplexing GPIO line events and signals
#[derive(Parser, Debug)]
#[command(
    name = "gpioctld",
    version = concat!("(gpioctl) ", env!("CARGO_PKG_VERSION")),
    about,
    disable_version_flag = true
)]
struct Args {
    /// Print version information and exit
    #[arg(
        short = 'v',
        long = "version",
        action = ArgAction::Version,
        value_parser = clap::value_parser!(bool)
    )]
    version: (),

    /// Read settings from a TOML file (defaults to $GPIOCTLD_CONFIG)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let program = program_name();

    match run(&program, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{program}: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(program: &str, args: &Args) -> Result<()> {
    let config = DaemonConfig::resolve(args.config.as_deref())
        .context("unable to load configuration")?;

    logging::init(program, &config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        max_events = config.max_events,
        "gpioctld starting"
    );

    let mut event_loop = EventLoop::new(&config)?;

    let signals = SignalSet::termination().context("unable to build signal set")?;
    event_loop.install_signal_bridge(&signals)?;

    let shutdown = event_loop.run();
    match shutdown.reason {
        StopReason::Requested => info!(released = shutdown.released, "gpioctld stopped"),
        StopReason::WaitFailed(_) => {
            info!(released = shutdown.released, "gpioctld stopped after loop failure")
        }
    }

    Ok(())
}
