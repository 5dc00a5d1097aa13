use crate::reactor::Context;
use crate::reactor::event::Event;
use crate::reactor::timer::TimerId;
use crate::signal::{SignalEvent, SignalKind};
use crate::utils::Key;

use std::fmt;
use std::os::fd::RawFd;

/// Stable handle to a registered watcher.
///
/// Handles are generational: once the watcher is finalized the handle never
/// resolves again, even if its slot is recycled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) Key);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}.{}", self.0.index, self.0.generation)
    }
}

/// Role a watcher plays in the loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    None,

    /// Consulted once per iteration before the block timeout is computed.
    /// Does not keep the loop alive on its own.
    TimeoutManager,
}

/// How [`Reactor::unregister`](crate::Reactor::unregister) disposes of the
/// watcher object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnregisterMode {
    /// Unlink only; the object can be reclaimed with
    /// [`Reactor::take_released`](crate::Reactor::take_released).
    UnlinkOnly,

    /// Run [`Watcher::on_destruct`], then park the object for reclaiming.
    UnlinkAndDestruct,

    /// Run [`Watcher::on_destruct`], then drop the object.
    UnlinkDestructAndFree,
}

/// Lifecycle of a registered watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionState {
    Alive,
    Unregistering,
    Destructing,
    DestructAndFree,
}

impl From<UnregisterMode> for DeletionState {
    fn from(mode: UnregisterMode) -> Self {
        match mode {
            UnregisterMode::UnlinkOnly => DeletionState::Unregistering,
            UnregisterMode::UnlinkAndDestruct => DeletionState::Destructing,
            UnregisterMode::UnlinkDestructAndFree => DeletionState::DestructAndFree,
        }
    }
}

/// A participant of the reactor loop.
///
/// Every callback runs synchronously on the reactor thread and receives a
/// [`Context`] through which it may change its own interests, touch other
/// watchers, or request termination. Callbacks must not block.
///
/// All methods have no-op defaults so a watcher only implements what it
/// uses.
pub trait Watcher {
    /// Short name used in diagnostics.
    fn name(&self) -> &str {
        "watcher"
    }

    /// A polled descriptor is ready.
    fn on_fd_ready(&mut self, cx: &mut Context<'_>, fd: RawFd, event: Event, tag: usize) {
        let _ = (cx, fd, event, tag);
    }

    /// A timer expired. Its countdown has already been reset.
    fn on_timer_fired(&mut self, cx: &mut Context<'_>, timer: TimerId, tag: usize) {
        let _ = (cx, timer, tag);
    }

    /// A relayed signal is being dispatched.
    ///
    /// Returning `true` also invokes [`on_legacy_signal`](Self::on_legacy_signal).
    fn on_signal(&mut self, cx: &mut Context<'_>, signal: &SignalEvent) -> bool {
        let _ = (cx, signal);
        true
    }

    /// Per-signal hook kept for watchers written against the older
    /// interface that only cared about the signal kind.
    fn on_legacy_signal(&mut self, cx: &mut Context<'_>, kind: SignalKind) {
        let _ = (cx, kind);
    }

    /// Called on the [`Role::TimeoutManager`] before the block timeout is
    /// computed.
    fn on_compute_timeout(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// Teardown hook for the destructing unregister modes.
    fn on_destruct(&mut self) {}
}
