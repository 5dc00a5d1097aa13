//! Signal relay.
//!
//! Asynchronous signals are captured by a minimal handler into a
//! preallocated ring and delivered to watchers later, on the reactor
//! thread, as [`SignalEvent`]s. The handler wakes a blocked reactor through
//! a self-pipe that sits in slot 0 of the poll array.

mod kind;
pub(crate) mod pool;
pub(crate) mod relay;

pub use kind::SignalKind;
pub use relay::OverflowPolicy;

use std::mem;
use std::time::Duration;

/// Sender details captured from `siginfo_t`.
///
/// Fields other than `code` are only filled on Linux.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalPayload {
    /// Sending process, for `kill(2)`-style and `SIGCHLD` signals.
    pub pid: i32,
    pub uid: u32,
    /// `si_code`.
    pub code: i32,
    /// Exit status or signal of the child for `SIGCHLD`.
    pub status: i32,
}

/// A signal as handed to [`Watcher::on_signal`](crate::Watcher::on_signal).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalEvent {
    pub kind: SignalKind,

    /// When the handler ran, on the [`monotonic_now`] clock.
    pub timestamp: Duration,

    pub payload: SignalPayload,
}

/// Reads `CLOCK_MONOTONIC`, the clock signal timestamps are taken from.
///
/// Async-signal-safe.
pub fn monotonic_now() -> Duration {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_now_advances() {
        let a = monotonic_now();
        std::thread::sleep(Duration::from_millis(2));
        let b = monotonic_now();
        assert!(b > a);
    }
}
