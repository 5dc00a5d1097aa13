//! # farm-reactor
//!
//! **farm-reactor** is the event-notification core of the render farm
//! controller. Task distribution, process supervision and the network
//! clients of the farm are all built as [`Watcher`]s driven by one
//! single-threaded [`Reactor`].
//!
//! The reactor provides:
//!
//! - **Descriptor polling** over a compacted `poll(2)` array that is only
//!   rebuilt when an interest change could not be applied in place
//! - **Interval timers** per watcher, with optional alignment that
//!   clusters timers of proportional periods to save wake-ups
//! - **Signal relaying**: a minimal handler stores signals in a
//!   preallocated ring and wakes the loop through a self-pipe, so watchers
//!   handle them as ordinary callbacks
//! - **Deferred destruction**: a watcher may unregister itself or a peer
//!   from any callback without disturbing the dispatch in progress
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use farm_reactor::{Context, Event, Interest, Reactor, SignalEvent, SignalKind, Watcher};
//! use std::os::fd::RawFd;
//!
//! struct Supervisor;
//!
//! impl Watcher for Supervisor {
//!     fn name(&self) -> &str {
//!         "supervisor"
//!     }
//!
//!     fn on_fd_ready(&mut self, _cx: &mut Context<'_>, fd: RawFd, event: Event, _tag: usize) {
//!         println!("fd {fd} ready: {event:?}");
//!     }
//!
//!     fn on_signal(&mut self, cx: &mut Context<'_>, signal: &SignalEvent) -> bool {
//!         if signal.kind == SignalKind::Terminate {
//!             cx.set_quit(0);
//!         }
//!         true
//!     }
//! }
//!
//! fn main() -> farm_reactor::Result<()> {
//!     farm_reactor::logging::init_logging(farm_reactor::logging::LogLevel::Info);
//!
//!     let mut reactor = Reactor::new()?;
//!     let id = reactor.register(Supervisor);
//!     reactor.poll_fd(id, 0, Interest::READ, 0)?;
//!
//!     std::process::exit(reactor.run_loop()?);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`signal`]: signal kinds, payloads and the overflow policy
//! - [`logging`]: subscriber setup for embedding daemons

mod error;
mod reactor;
mod utils;

pub mod logging;
pub mod signal;

pub use error::{Error, Result};
pub use reactor::{
    AlignDirection, AlignPolicy, AlignTarget, Context, DeletionState, Event, FdHandle, FdTarget, Interest, LoopStats,
    Reactor, ReactorBuilder, ReactorConfig, Role, TimerId, UnregisterMode, Watcher, WatcherId,
};
pub use signal::{OverflowPolicy, SignalEvent, SignalKind, SignalPayload};
