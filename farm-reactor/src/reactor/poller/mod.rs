//! `poll(2)`-based readiness primitive and the reactor's compacted poll array.
//!
//! The poll array is the table handed to `poll(2)`. Index 0 always holds the
//! signal self-pipe (or an ignored `-1` when no relay is installed); every
//! following slot belongs to exactly one descriptor entry.
//!
//! The array is a cache over the watchers' descriptor tables:
//! - cheap changes (a new entry while headroom remains, a non-zero mask
//!   change) are written in place,
//! - everything else neutralizes the affected slot and bumps the dirty
//!   counter, and the reactor rebuilds the whole array once before blocking.

pub(crate) mod common;
pub(crate) mod unix;

use crate::error::{Error, Result};
use crate::reactor::io::FdHandle;
use common::Interest;
use unix::sys_poll;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, pollfd};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

const VACANT: pollfd = pollfd {
    fd: -1,
    events: 0,
    revents: 0,
};

/// The reactor-owned table of active interests.
pub(crate) struct PollArray {
    /// `fds[0]` is the wake pipe; `fds[1 + i]` is slot `i`.
    fds: Vec<pollfd>,

    /// Descriptor entry occupying each slot.
    owners: Vec<Option<FdHandle>>,

    /// Number of slots handed to `poll(2)`.
    used: usize,

    /// Growth and shrink step.
    chunk: usize,

    /// Pending invalidations since the last rebuild.
    dirty: u64,
}

impl PollArray {
    /// Creates an empty array with one chunk of headroom.
    pub(crate) fn new(wake_fd: Option<RawFd>, chunk: usize) -> Self {
        let mut fds = vec![VACANT; chunk + 1];
        if let Some(fd) = wake_fd {
            fds[0] = pollfd {
                fd,
                events: POLLIN,
                revents: 0,
            };
        }

        Self {
            fds,
            owners: vec![None; chunk],
            used: 0,
            chunk,
            dirty: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty != 0
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = self.dirty.wrapping_add(1).max(1);
    }

    /// Fast path for a new interest.
    ///
    /// Returns the slot when the array is clean and has headroom; `None`
    /// means the caller must mark the array dirty instead.
    pub(crate) fn try_place(&mut self, handle: FdHandle, fd: RawFd, interest: Interest) -> Option<usize> {
        if self.is_dirty() || self.used == self.capacity() {
            return None;
        }

        let slot = self.used;
        self.write(slot, handle, fd, interest);
        self.used += 1;

        Some(slot)
    }

    /// Rewrites the interest bits of an occupied slot.
    pub(crate) fn update(&mut self, slot: usize, interest: Interest) {
        let pfd = &mut self.fds[slot + 1];
        pfd.events = interest.poll_events();
    }

    /// Neutralizes a slot so `poll(2)` ignores it until the next rebuild.
    pub(crate) fn vacate(&mut self, slot: usize) {
        self.fds[slot + 1] = VACANT;
        self.owners[slot] = None;
        self.mark_dirty();
    }

    /// Starts a rebuild sized for `live` entries.
    ///
    /// Capacity grows when `live` exceeds it and shrinks only once the slack
    /// passes two chunks, so a count hovering at a chunk boundary never
    /// reallocates back and forth.
    pub(crate) fn begin_rebuild(&mut self, live: usize) -> Result<()> {
        let capacity = self.capacity();
        let target = if live > capacity || capacity - live > 2 * self.chunk {
            (live / self.chunk + 1) * self.chunk
        } else {
            capacity
        };

        if target > capacity {
            let extra = target - capacity;
            self.fds
                .try_reserve_exact(extra)
                .map_err(|_| Error::PollArrayAlloc(target))?;
            self.owners
                .try_reserve_exact(extra)
                .map_err(|_| Error::PollArrayAlloc(target))?;
        }

        self.fds.resize(target + 1, VACANT);
        self.owners.resize(target, None);
        if target < capacity {
            self.fds.shrink_to_fit();
            self.owners.shrink_to_fit();
        }

        for slot in 0..self.used.min(target) {
            self.fds[slot + 1] = VACANT;
            self.owners[slot] = None;
        }
        self.used = 0;

        Ok(())
    }

    /// Appends an entry during a rebuild and returns its slot.
    pub(crate) fn push(&mut self, handle: FdHandle, fd: RawFd, interest: Interest) -> usize {
        let slot = self.used;
        self.write(slot, handle, fd, interest);
        self.used += 1;
        slot
    }

    pub(crate) fn finish_rebuild(&mut self) {
        self.dirty = 0;
    }

    fn write(&mut self, slot: usize, handle: FdHandle, fd: RawFd, interest: Interest) {
        self.fds[slot + 1] = pollfd {
            fd,
            events: interest.poll_events(),
            revents: 0,
        };
        self.owners[slot] = Some(handle);
    }

    /// Blocks until readiness, a wake-up or the timeout.
    ///
    /// `None` blocks indefinitely. Timeouts are rounded up to whole
    /// milliseconds so a sub-millisecond remainder never degenerates into a
    /// busy loop.
    pub(crate) fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout
            .map(|t| {
                let ms = t.as_nanos().div_ceil(1_000_000);
                ms.min(i32::MAX as u128) as i32
            })
            .unwrap_or(-1);

        sys_poll(&mut self.fds[..self.used + 1], timeout_ms)
    }

    /// Whether the last poll reported the wake pipe readable.
    pub(crate) fn wake_ready(&self) -> bool {
        self.fds[0].revents & (POLLIN | POLLERR | POLLHUP) != 0
    }

    pub(crate) fn revents(&self, slot: usize) -> i16 {
        self.fds[slot + 1].revents
    }

    pub(crate) fn is_invalid(&self, slot: usize) -> bool {
        self.fds[slot + 1].revents & POLLNVAL != 0
    }

    pub(crate) fn owner(&self, slot: usize) -> Option<FdHandle> {
        self.owners.get(slot).copied().flatten()
    }

    pub(crate) fn slot_fd(&self, slot: usize) -> RawFd {
        self.fds[slot + 1].fd
    }

    #[cfg(test)]
    pub(crate) fn slot_events(&self, slot: usize) -> i16 {
        self.fds[slot + 1].events
    }
}
