use super::Reactor;
use super::io::{FdHandle, FdTarget};
use super::poller::common::Interest;
use super::timer::{AlignPolicy, TimerId};
use super::watcher::{UnregisterMode, Watcher, WatcherId};
use crate::error::Result;

use std::os::fd::RawFd;
use std::time::Duration;

/// A callback's view of the reactor.
///
/// Operations without an explicit watcher apply to the watcher whose
/// callback is running. [`reactor`](Self::reactor) exposes the whole
/// reactor for operations on peers; unregistering a peer from here is safe
/// and takes effect at the next tidy point.
pub struct Context<'a> {
    reactor: &'a mut Reactor,
    id: WatcherId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(reactor: &'a mut Reactor, id: WatcherId) -> Self {
        Self { reactor, id }
    }

    /// The watcher this callback runs for.
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn reactor(&mut self) -> &mut Reactor {
        self.reactor
    }

    pub fn register<W: Watcher + 'static>(&mut self, watcher: W) -> WatcherId {
        self.reactor.register(watcher)
    }

    /// Unregisters the running watcher. Its remaining callbacks for this
    /// batch are skipped.
    pub fn unregister(&mut self, mode: UnregisterMode) -> Result<()> {
        self.reactor.unregister(self.id, mode)
    }

    pub fn poll_fd(&mut self, fd: RawFd, interest: Interest, tag: usize) -> Result<FdHandle> {
        self.reactor.poll_fd(self.id, fd, interest, tag)
    }

    pub fn unpoll_fd(&mut self, target: impl Into<FdTarget>) -> Result<()> {
        self.reactor.unpoll_fd(self.id, target)
    }

    pub fn install_timer(&mut self, period: Option<Duration>, align: AlignPolicy, tag: usize) -> Result<TimerId> {
        self.reactor.install_timer(self.id, period, align, tag)
    }

    pub fn update_timer(&mut self, timer: TimerId, period: Option<Duration>) -> Result<()> {
        self.reactor.update_timer(timer, period)
    }

    pub fn reset_timer(&mut self, timer: TimerId) -> Result<()> {
        self.reactor.reset_timer(timer)
    }

    pub fn kill_timer(&mut self, timer: TimerId) -> Result<()> {
        self.reactor.kill_timer(timer)
    }

    pub fn kill_all_timers(&mut self) -> Result<()> {
        self.reactor.kill_all_timers(self.id)
    }

    pub fn timer_remaining(&self, timer: TimerId) -> Result<Option<Duration>> {
        self.reactor.timer_remaining(timer)
    }

    /// Stops fd and timer dispatch for the rest of this iteration and ends
    /// the loop with `code`.
    pub fn set_quit(&mut self, code: i32) {
        self.reactor.set_quit(code)
    }
}
