//! Reactor core and event handling.
//!
//! The reactor multiplexes readiness on descriptors with `poll(2)`,
//! counts down per-watcher interval timers and delivers relayed process
//! signals, all on one thread. Each iteration runs:
//!
//! 1. timeout computation (after the timeout manager had its say),
//! 2. a signal drain,
//! 3. a poll array rebuild if anything invalidated it,
//! 4. the blocking `poll(2)`,
//! 5. descriptor dispatch, a signal drain, timer dispatch and a final
//!    signal drain.
//!
//! Watchers unregistered along the way are finalized between phases.

mod builder;
mod context;
mod core;
mod event;
mod io;
mod registry;
mod timer;
mod watcher;

pub(crate) mod poller;

pub use builder::{ReactorBuilder, ReactorConfig};
pub use context::Context;
pub use self::core::{LoopStats, Reactor};
pub use event::Event;
pub use io::{FdHandle, FdTarget};
pub use poller::common::Interest;
pub use timer::{AlignDirection, AlignPolicy, AlignTarget, TimerId};
pub use watcher::{DeletionState, Role, UnregisterMode, Watcher, WatcherId};
