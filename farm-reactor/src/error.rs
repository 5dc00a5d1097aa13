use crate::reactor::{TimerId, WatcherId};

use std::io;

/// Errors reported by the reactor.
///
/// Transient conditions (interrupted polls, short allocation failures) are
/// recovered inside the loop and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The readiness primitive failed with a non-recoverable error.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("unknown watcher {0}")]
    UnknownWatcher(WatcherId),

    /// The watcher was unregistered and waits for the tidy pass.
    #[error("watcher {0} is condemned")]
    Condemned(WatcherId),

    #[error("watcher {0} has no such descriptor entry")]
    UnknownDescriptor(WatcherId),

    #[error("unknown timer {0:?}")]
    UnknownTimer(TimerId),

    #[error("timeout manager role already held by {0}")]
    RoleTaken(WatcherId),

    /// A dispatch routine was entered while already active on the stack.
    #[error("re-entrant {0} refused")]
    Reentrant(&'static str),

    #[error("run_loop has already been executed")]
    AlreadyRan,

    #[error("a signal relay is already installed in this process")]
    RelayBusy,

    #[error("poll array allocation of {0} slots failed")]
    PollArrayAlloc(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
