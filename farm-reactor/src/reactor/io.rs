use crate::reactor::WatcherId;
use crate::reactor::poller::common::Interest;

use std::os::fd::RawFd;

/// Handle to a descriptor entry returned by
/// [`Reactor::poll_fd`](crate::Reactor::poll_fd).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FdHandle {
    pub(crate) watcher: WatcherId,
    pub(crate) serial: u32,
}

impl FdHandle {
    /// The watcher owning the entry.
    pub fn watcher(&self) -> WatcherId {
        self.watcher
    }
}

/// Selects a descriptor entry either by raw descriptor or by handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdTarget {
    Fd(RawFd),
    Handle(FdHandle),
}

impl From<RawFd> for FdTarget {
    fn from(fd: RawFd) -> Self {
        FdTarget::Fd(fd)
    }
}

impl From<FdHandle> for FdTarget {
    fn from(handle: FdHandle) -> Self {
        FdTarget::Handle(handle)
    }
}

/// Position of a descriptor entry in the poll array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArrayIndex {
    /// Not in the array.
    Unassigned,

    /// The slot was neutralized; the next rebuild drops it.
    Detached,

    Slot(usize),
}

/// An interest registered by one watcher.
pub(crate) struct FdEntry {
    pub(crate) serial: u32,
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    pub(crate) tag: usize,
    pub(crate) index: ArrayIndex,
}

impl FdEntry {
    pub(crate) fn matches(&self, target: FdTarget) -> bool {
        match target {
            FdTarget::Fd(fd) => self.fd == fd,
            FdTarget::Handle(handle) => self.serial == handle.serial,
        }
    }
}
