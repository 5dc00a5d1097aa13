//! Process-wide signal handler feeding the reactor.
//!
//! The handler only touches the [`SignalPool`], a few atomics and the write
//! end of the self-pipe. Everything else happens on the reactor thread when
//! the pool is drained.

use super::pool::{SignalPool, SignalRecord};
use super::{SignalKind, SignalPayload, monotonic_now};
use crate::error::{Error, Result};
use crate::reactor::poller::unix::{sys_close, sys_drain, sys_pipe, sys_write};

use libc::{c_int, c_void, siginfo_t};
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use tracing::debug;

/// What the handler does when every pool cell is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Print a diagnostic and abort the process.
    #[default]
    Abort,

    /// Print a diagnostic and discard the signal. The reactor reports the
    /// count on its next drain.
    Drop,
}

/// State reachable from the handler.
struct Shared {
    pool: SignalPool,
    wake_write: RawFd,

    /// Set by the first signal after a drain; cleared by the consumer.
    notified: AtomicBool,

    dropped: AtomicU64,
    policy: OverflowPolicy,
}

static ACTIVE: AtomicPtr<Shared> = AtomicPtr::new(ptr::null_mut());

pub(crate) struct SignalRelay {
    shared: Box<Shared>,
    wake_read: RawFd,
    mask: libc::sigset_t,
    previous: Vec<(SignalKind, libc::sigaction)>,
    reported_dropped: u64,
}

impl SignalRelay {
    /// Installs handlers for `kinds`.
    ///
    /// Fails with [`Error::RelayBusy`] if another relay is live in this
    /// process.
    pub(crate) fn install(kinds: &[SignalKind], capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        let (wake_read, wake_write) = sys_pipe()?;

        let shared = Box::new(Shared {
            pool: SignalPool::new(capacity),
            wake_write,
            notified: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            policy,
        });

        let raw = &*shared as *const Shared as *mut Shared;
        if ACTIVE
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let _ = sys_close(wake_read);
            let _ = sys_close(wake_write);
            return Err(Error::RelayBusy);
        }

        let mut relay = Self {
            shared,
            wake_read,
            mask: signal_set(kinds),
            previous: Vec::with_capacity(kinds.len()),
            reported_dropped: 0,
        };

        for &kind in kinds {
            if relay.previous.iter().any(|(k, _)| *k == kind) {
                continue;
            }
            // Drop restores whatever was installed so far.
            let previous = install_handler(kind, &relay.mask)?;
            relay.previous.push((kind, previous));
        }

        debug!(
            signals = ?kinds.iter().map(SignalKind::name).collect::<Vec<_>>(),
            capacity,
            ?policy,
            "signal relay installed"
        );

        Ok(relay)
    }

    pub(crate) fn wake_fd(&self) -> RawFd {
        self.wake_read
    }

    /// Consumes the wake bytes and re-arms the notification.
    ///
    /// The pipe is only read when a signal notified since the last rearm or
    /// `woke` reports the wake slot readable. Must run before the pool is
    /// drained so a signal arriving mid-drain wakes the next poll.
    pub(crate) fn rearm(&self, woke: bool) -> bool {
        if !woke && !self.shared.notified.load(Ordering::Acquire) {
            return false;
        }

        sys_drain(self.wake_read);
        self.shared.notified.store(false, Ordering::SeqCst);
        true
    }

    pub(crate) fn front(&self) -> Option<SignalRecord> {
        self.shared.pool.front()
    }

    pub(crate) fn unpend(&self, signo: i32) {
        self.shared.pool.unpend(signo);
    }

    /// Returns the front cell with the relayed signals blocked.
    pub(crate) fn release_front(&self) {
        with_blocked(&self.mask, || self.shared.pool.release_front());
    }

    pub(crate) fn pending(&self, kind: SignalKind) -> u32 {
        self.shared.pool.pending(kind.as_raw())
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }

    /// Drops recorded since the previous call.
    pub(crate) fn take_new_drops(&mut self) -> u64 {
        let total = self.dropped();
        let fresh = total - self.reported_dropped;
        self.reported_dropped = total;
        fresh
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        // The mask only covers this thread. A handler already running on
        // another thread may still hold `shared` when it is freed.
        let own = &*self.shared as *const Shared as *mut Shared;
        let previous = mem::take(&mut self.previous);
        with_blocked(&self.mask, || {
            for (kind, action) in previous.iter().rev() {
                unsafe { libc::sigaction(kind.as_raw(), action, ptr::null_mut()) };
            }
            let _ = ACTIVE.compare_exchange(own, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
        });

        let _ = sys_close(self.wake_read);
        let _ = sys_close(self.shared.wake_write);

        debug!("signal relay removed");
    }
}

fn signal_set(kinds: &[SignalKind]) -> libc::sigset_t {
    let mut set: libc::sigset_t = unsafe { mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for kind in kinds {
            libc::sigaddset(&mut set, kind.as_raw());
        }
    }
    set
}

fn install_handler(kind: SignalKind, mask: &libc::sigset_t) -> Result<libc::sigaction> {
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handle_signal as extern "C" fn(c_int, *mut siginfo_t, *mut c_void) as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    action.sa_mask = *mask;

    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    let rc = unsafe { libc::sigaction(kind.as_raw(), &action, &mut previous) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(previous)
}

fn with_blocked<R>(mask: &libc::sigset_t, f: impl FnOnce() -> R) -> R {
    let mut old: libc::sigset_t = unsafe { mem::zeroed() };
    unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, mask, &mut old) };
    let result = f();
    unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &old, ptr::null_mut()) };
    result
}

extern "C" fn handle_signal(signo: c_int, info: *mut siginfo_t, _context: *mut c_void) {
    let _errno = ErrnoGuard::save();

    let shared = ACTIVE.load(Ordering::Acquire);
    if shared.is_null() {
        return;
    }
    let shared = unsafe { &*shared };

    let record = SignalRecord {
        signo,
        timestamp: monotonic_now(),
        payload: unsafe { payload_from(signo, info) },
    };

    if shared.pool.push(record) {
        if !shared.notified.swap(true, Ordering::AcqRel) {
            sys_write(shared.wake_write, &[1]);
        }
        return;
    }

    match shared.policy {
        OverflowPolicy::Abort => {
            write_stderr(b"farm-reactor: signal pool exhausted, aborting\n");
            unsafe { libc::abort() };
        }
        OverflowPolicy::Drop => {
            shared.dropped.fetch_add(1, Ordering::AcqRel);
            write_stderr(b"farm-reactor: signal pool exhausted, signal dropped\n");
        }
    }
}

fn write_stderr(message: &[u8]) {
    sys_write(libc::STDERR_FILENO, message);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn payload_from(signo: c_int, info: *const siginfo_t) -> SignalPayload {
    if info.is_null() {
        return SignalPayload::default();
    }

    let info = unsafe { &*info };
    let is_child = signo == libc::SIGCHLD;

    unsafe {
        SignalPayload {
            pid: info.si_pid(),
            uid: info.si_uid(),
            code: info.si_code,
            status: if is_child { info.si_status() } else { 0 },
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn payload_from(_signo: c_int, info: *const siginfo_t) -> SignalPayload {
    if info.is_null() {
        return SignalPayload::default();
    }

    SignalPayload {
        code: unsafe { (*info).si_code },
        ..SignalPayload::default()
    }
}

/// Restores `errno` on scope exit so the interrupted code never observes
/// the handler's syscalls.
struct ErrnoGuard(c_int);

impl ErrnoGuard {
    fn save() -> Self {
        Self(unsafe { *errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe { *errno_location() = self.0 };
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}
