//! End-to-end tests for the gpioctld binary.
//!
//! These spawn the real daemon, wait until it reports that the main loop is
//! running, and drive it with process signals.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Constants
// ============================================================================

const BIN: &str = env!("CARGO_BIN_EXE_gpioctld");
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

struct Daemon {
    child: Child,
    lines: Receiver<String>,
    seen: Vec<String>,
}

impl Daemon {
    fn spawn(rust_log: Option<&str>) -> Self {
        let mut command = Command::new(BIN);
        command
            .env_remove("RUST_LOG")
            .env_remove("GPIOCTLD_CONFIG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(filter) = rust_log {
            command.env("RUST_LOG", filter);
        }

        let mut child = command.spawn().expect("spawn gpioctld");
        let stderr = child.stderr.take().expect("piped stderr");

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Daemon {
            child,
            lines: rx,
            seen: Vec::new(),
        }
    }

    fn wait_for_line(&mut self, needle: &str) {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    let found = line.contains(needle);
                    self.seen.push(line);
                    if found {
                        return;
                    }
                }
                Err(_) => {
                    let _ = self.child.kill();
                    panic!("daemon never logged {needle:?}; got {:#?}", self.seen);
                }
            }
        }
    }

    fn signal(&self, signo: libc::c_int) {
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, signo) };
        assert_eq!(rc, 0, "kill() failed");
    }

    /// Waits for exit and returns the status plus every stderr line.
    fn wait(mut self) -> (ExitStatus, Vec<String>) {
        let deadline = Instant::now() + EXIT_TIMEOUT;
        let status = loop {
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = self.child.kill();
                panic!("daemon did not exit; got {:#?}", self.seen);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };

        // The reader thread ends once stderr closes.
        self.seen.extend(self.lines.iter());
        (status, self.seen)
    }
}

fn run_with_args(args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("GPIOCTLD_CONFIG")
        .output()
        .expect("run gpioctld")
}

fn has_line(lines: &[String], needle: &str) -> bool {
    lines.iter().any(|line| line.contains(needle))
}

// ============================================================================
// Signal-driven shutdown
// ============================================================================

#[test]
fn test_sigint_shuts_down_cleanly() {
    let mut daemon = Daemon::spawn(None);
    daemon.wait_for_line("entering main loop");

    daemon.signal(libc::SIGINT);
    let (status, lines) = daemon.wait();

    assert!(status.success(), "exit status {status:?}, log {lines:#?}");
    assert!(
        has_line(&lines, "gpioctld [ INFO]: signal received - terminating"),
        "{lines:#?}"
    );
    assert!(has_line(&lines, "gpioctld stopped"), "{lines:#?}");
}

#[test]
fn test_sigterm_shuts_down_cleanly() {
    let mut daemon = Daemon::spawn(None);
    daemon.wait_for_line("entering main loop");

    daemon.signal(libc::SIGTERM);
    daemon.signal(libc::SIGTERM);
    let (status, lines) = daemon.wait();

    assert!(status.success(), "exit status {status:?}, log {lines:#?}");
    assert!(has_line(&lines, "signal=\"SIGTERM\""), "{lines:#?}");
}

#[test]
fn test_teardown_releases_bridge_and_epoll() {
    let mut daemon = Daemon::spawn(Some("debug"));
    daemon.wait_for_line("entering main loop");

    daemon.signal(libc::SIGINT);
    let (status, lines) = daemon.wait();

    assert!(status.success(), "exit status {status:?}, log {lines:#?}");
    let release = lines
        .iter()
        .position(|line| line.contains("releasing listener") && line.contains("signalfd"))
        .expect("signalfd listener released");
    let destroy = lines
        .iter()
        .position(|line| line.contains("epoll instance destroyed"))
        .expect("epoll instance destroyed");
    assert!(release < destroy, "{lines:#?}");
}

// ============================================================================
// Command line
// ============================================================================

#[test]
fn test_version_flag() {
    for flag in ["-v", "--version"] {
        let output = run_with_args(&[flag]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.starts_with("gpioctld (gpioctl) "), "{stdout}");
        assert!(stdout.trim_end().ends_with(env!("CARGO_PKG_VERSION")), "{stdout}");
    }
}

#[test]
fn test_help_flag() {
    for flag in ["-h", "--help"] {
        let output = run_with_args(&[flag]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Usage:"), "{stdout}");
        assert!(stdout.contains("--config"), "{stdout}");
    }
}

#[test]
fn test_positional_argument_is_usage_error() {
    let output = run_with_args(&["gpiochip0"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gpiochip0"), "{stderr}");
}

#[test]
fn test_unknown_option_is_usage_error() {
    let output = run_with_args(&["--frobnicate"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_config_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(file, "max_events = 0").expect("write config");

    let path = file.path().to_str().expect("utf-8 path");
    let output = run_with_args(&["--config", path]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.starts_with("gpioctld: unable to load configuration"),
        "{stderr}"
    );
    assert!(stderr.contains("max_events"), "{stderr}");
}

#[test]
fn test_config_parse_error_names_cause_once() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(file, "max_events = [").expect("write config");

    let path = file.path().to_str().expect("utf-8 path");
    let output = run_with_args(&["--config", path]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.starts_with("gpioctld: unable to load configuration: failed to parse config file"),
        "{stderr}"
    );
    assert_eq!(stderr.matches("TOML parse error").count(), 1, "{stderr}");
    assert_eq!(stderr.matches("failed to parse config file").count(), 1, "{stderr}");
}

#[test]
fn test_config_from_environment_is_fatal_when_invalid() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(file, "max_events = 0").expect("write config");

    let output = Command::new(BIN)
        .env_remove("RUST_LOG")
        .env("GPIOCTLD_CONFIG", file.path())
        .output()
        .expect("run gpioctld");
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.starts_with("gpioctld: unable to load configuration"),
        "{stderr}"
    );
    assert!(stderr.contains("max_events"), "{stderr}");
}
