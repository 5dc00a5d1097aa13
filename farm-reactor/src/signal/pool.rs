//! Fixed-capacity signal ring shared between the handler and the reactor.
//!
//! Producers are signal handlers, possibly running on any thread and
//! possibly nested. They reserve a cell by advancing `tail` with a CAS,
//! fill it, and publish it through the cell's `ready` flag. The reactor
//! thread is the only consumer: it reads the cell at `head` once published
//! and advances `head` after dispatch. Nothing here allocates or locks
//! after construction.

use super::SignalPayload;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Highest signal number tracked by the pending counters, exclusive.
pub(crate) const MAX_SIGNO: usize = 65;

/// One relayed signal as captured in the handler.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SignalRecord {
    pub(crate) signo: i32,
    pub(crate) timestamp: Duration,
    pub(crate) payload: SignalPayload,
}

struct Cell {
    ready: AtomicBool,
    record: UnsafeCell<MaybeUninit<SignalRecord>>,
}

pub(crate) struct SignalPool {
    cells: Box<[Cell]>,

    /// Next cell to consume. Written by the consumer only.
    head: AtomicUsize,

    /// Next cell to reserve.
    tail: AtomicUsize,

    pending: [AtomicU32; MAX_SIGNO],
}

// Cells are handed out exclusively through the tail CAS and read back only
// after their `ready` flag was published.
unsafe impl Sync for SignalPool {}
unsafe impl Send for SignalPool {}

impl SignalPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let cells = (0..capacity)
            .map(|_| Cell {
                ready: AtomicBool::new(false),
                record: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            cells,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            pending: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Stores a record. Async-signal-safe.
    ///
    /// Returns `false` when every cell is taken.
    pub(crate) fn push(&self, record: SignalRecord) -> bool {
        let capacity = self.cells.len();
        if capacity == 0 {
            return false;
        }

        let position = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= capacity {
                return false;
            }

            if self
                .tail
                .compare_exchange_weak(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break tail;
            }
        };

        let cell = &self.cells[position % capacity];
        unsafe { (*cell.record.get()).write(record) };

        if let Some(counter) = self.counter(record.signo) {
            counter.fetch_add(1, Ordering::AcqRel);
        }
        cell.ready.store(true, Ordering::Release);

        true
    }

    /// Copies the oldest published record without consuming it.
    ///
    /// A cell that is reserved but not yet published reads as empty; its
    /// producer writes the wake pipe again once it finishes.
    pub(crate) fn front(&self) -> Option<SignalRecord> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        let cell = &self.cells[head % self.cells.len()];
        if !cell.ready.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { (*cell.record.get()).assume_init() })
    }

    /// Takes the front record off the pending count before dispatch.
    pub(crate) fn unpend(&self, signo: i32) {
        if let Some(counter) = self.counter(signo) {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }

    /// Returns the front cell to the pool.
    pub(crate) fn release_front(&self) {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return;
        }

        let cell = &self.cells[head % self.cells.len()];
        cell.ready.store(false, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
    }

    /// Records stored but not yet released.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    pub(crate) fn pending(&self, signo: i32) -> u32 {
        self.counter(signo)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    fn counter(&self, signo: i32) -> Option<&AtomicU32> {
        usize::try_from(signo).ok().and_then(|i| self.pending.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(signo: i32, ms: u64) -> SignalRecord {
        SignalRecord {
            signo,
            timestamp: Duration::from_millis(ms),
            payload: SignalPayload::default(),
        }
    }

    fn pop(pool: &SignalPool) -> Option<SignalRecord> {
        let record = pool.front()?;
        pool.unpend(record.signo);
        pool.release_front();
        Some(record)
    }

    #[test]
    fn test_fifo_order() {
        let pool = SignalPool::new(4);
        assert!(pool.push(record(libc::SIGUSR1, 1)));
        assert!(pool.push(record(libc::SIGUSR2, 2)));
        assert!(pool.push(record(libc::SIGUSR1, 3)));

        let order: Vec<_> = std::iter::from_fn(|| pop(&pool))
            .map(|r| (r.signo, r.timestamp.as_millis()))
            .collect();
        assert_eq!(
            order,
            vec![(libc::SIGUSR1, 1), (libc::SIGUSR2, 2), (libc::SIGUSR1, 3)]
        );
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let pool = SignalPool::new(2);
        assert!(pool.push(record(libc::SIGHUP, 1)));
        assert!(pool.push(record(libc::SIGHUP, 2)));
        assert!(!pool.push(record(libc::SIGHUP, 3)));
        assert_eq!(pool.pending(libc::SIGHUP), 2);

        assert_eq!(pop(&pool).map(|r| r.timestamp.as_millis()), Some(1));
        assert!(pool.push(record(libc::SIGHUP, 4)));

        assert_eq!(pop(&pool).map(|r| r.timestamp.as_millis()), Some(2));
        assert_eq!(pop(&pool).map(|r| r.timestamp.as_millis()), Some(4));
        assert!(pop(&pool).is_none());
    }

    #[test]
    fn test_pending_counts() {
        let pool = SignalPool::new(8);
        pool.push(record(libc::SIGCHLD, 0));
        pool.push(record(libc::SIGCHLD, 0));
        pool.push(record(libc::SIGTERM, 0));

        assert_eq!(pool.pending(libc::SIGCHLD), 2);
        assert_eq!(pool.pending(libc::SIGTERM), 1);

        let front = pool.front().unwrap();
        pool.unpend(front.signo);
        assert_eq!(pool.pending(libc::SIGCHLD), 1);
        pool.release_front();

        assert_eq!(pool.pending(-1), 0);
        assert_eq!(pool.pending(1000), 0);
    }

    #[test]
    fn test_front_is_idempotent() {
        let pool = SignalPool::new(2);
        pool.push(record(libc::SIGINT, 5));

        assert_eq!(pool.front().map(|r| r.signo), Some(libc::SIGINT));
        assert_eq!(pool.front().map(|r| r.signo), Some(libc::SIGINT));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let pool = std::sync::Arc::new(SignalPool::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..16 {
                        assert!(pool.push(record(libc::SIGUSR1, t * 100 + i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.len(), 64);
        assert_eq!(pool.pending(libc::SIGUSR1), 64);
        assert_eq!(std::iter::from_fn(|| pop(&pool)).count(), 64);
    }
}
