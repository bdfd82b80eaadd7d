//! gpioctld - event dispatch engine
//!
//! This crate provides the core of the gpioctld daemon:
//! - `listener` - a readable descriptor bound to its event source
//! - `registry` - ordered ownership of every live listener
//! - `dispatcher` - the epoll instance and its interest set
//! - `signal` - SIGINT/SIGTERM delivered through a signalfd
//! - `event_loop` - the main loop and the teardown protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         EventLoop                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  wait()   ┌─────────────────────────┐  │
//! │  │   Dispatcher    │──────────▶│  Token ─▶ Registry slot │  │
//! │  │    (epoll)      │           └────────────┬────────────┘  │
//! │  └────────▲────────┘                        │ dispatch()    │
//! │           │ register                        ▼               │
//! │  ┌────────┴────────┐           ┌─────────────────────────┐  │
//! │  │    Registry     │──────────▶│ EventSource::handle(fd) │  │
//! │  │ Vec<Listener>   │           │   -> Continue | Stop    │  │
//! │  └─────────────────┘           └─────────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread. Signals arrive as data on a signalfd, so no
//! code ever runs asynchronously to the loop.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   outside of tests
//! - Callbacks report through `Action`, never through panics or errors

pub mod dispatcher;
pub mod event_loop;
pub mod listener;
pub mod registry;
pub mod signal;

pub use dispatcher::{Dispatcher, Events, Token};
pub use event_loop::{EventLoop, Shutdown, StopFlag, StopReason};
pub use listener::{Action, EventSource, Listener};
pub use registry::{Registry, Rejected};
pub use signal::{SignalHandler, SignalSet};
