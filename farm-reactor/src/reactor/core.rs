use super::builder::{ReactorBuilder, ReactorConfig};
use super::context::Context;
use super::event::Event;
use super::io::{ArrayIndex, FdEntry, FdHandle, FdTarget};
use super::poller::PollArray;
use super::poller::common::Interest;
use super::poller::unix::sys_close;
use super::registry::Registry;
use super::timer::{AlignParams, AlignPolicy, TimerEntry, TimerId, align};
use super::watcher::{Role, UnregisterMode, Watcher, WatcherId};
use crate::error::{Error, Result};
use crate::signal::relay::SignalRelay;
use crate::signal::{SignalEvent, SignalKind};

use std::io;
use std::os::fd::RawFd;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Counters describing what the loop has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Iterations that reached the dispatch phases.
    pub iterations: u64,

    /// Block timeout computed by the latest iteration; `None` blocked
    /// indefinitely.
    pub last_timeout: Option<Duration>,

    pub fd_dispatches: u64,
    pub timer_fires: u64,
    pub signals_dispatched: u64,
    pub signals_dropped: u64,
    pub rebuilds: u64,
}

/// Dispatch phases guarded against re-entry.
#[derive(Clone, Copy, Debug, Default)]
struct Active {
    iteration: bool,
    drain: bool,
    dispatch: bool,
}

/// The single-threaded event loop.
///
/// A `Reactor` owns every registered [`Watcher`], the poll array, the timer
/// clock and, unless built without signals, the process-wide signal relay.
/// Callbacks receive a [`Context`] that borrows the reactor mutably, so all
/// registration, descriptor and timer operations are available from inside
/// callbacks as well as from the embedding code.
///
/// # Examples
///
/// ```rust,no_run
/// use farm_reactor::{Context, Reactor, Watcher};
/// use std::time::Duration;
///
/// struct Tick(u32);
///
/// impl Watcher for Tick {
///     fn on_timer_fired(&mut self, cx: &mut Context<'_>, _: farm_reactor::TimerId, _: usize) {
///         self.0 += 1;
///         if self.0 == 3 {
///             cx.set_quit(0);
///         }
///     }
/// }
///
/// let mut reactor = Reactor::new().unwrap();
/// let id = reactor.register(Tick(0));
/// reactor
///     .install_timer(id, Some(Duration::from_millis(10)), Default::default(), 0)
///     .unwrap();
/// assert_eq!(reactor.run_loop().unwrap(), 0);
/// ```
pub struct Reactor {
    registry: Registry,
    poll_array: PollArray,
    relay: Option<SignalRelay>,
    config: ReactorConfig,

    /// Instant every timer's `remaining` is relative to.
    last_tick: Instant,

    quit: Option<i32>,
    active: Active,

    /// Callbacks currently on the stack.
    depth: usize,

    ran: bool,
    stats: LoopStats,
}

impl Reactor {
    /// Builds a reactor relaying the default signal set.
    pub fn new() -> Result<Self> {
        ReactorBuilder::new().build()
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub(crate) fn with_config(config: ReactorConfig) -> Result<Self> {
        let relay = if config.signals.is_empty() {
            None
        } else {
            Some(SignalRelay::install(
                &config.signals,
                config.signal_pool_capacity,
                config.overflow_policy,
            )?)
        };

        let poll_array = PollArray::new(relay.as_ref().map(SignalRelay::wake_fd), config.poll_chunk);

        Ok(Self {
            registry: Registry::new(),
            poll_array,
            relay,
            config,
            last_tick: Instant::now(),
            quit: None,
            active: Active::default(),
            depth: 0,
            ran: false,
            stats: LoopStats::default(),
        })
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    // --- Watchers ---

    pub fn register<W: Watcher + 'static>(&mut self, watcher: W) -> WatcherId {
        self.register_boxed(Box::new(watcher))
    }

    pub fn register_boxed(&mut self, watcher: Box<dyn Watcher>) -> WatcherId {
        let id = self.registry.insert(watcher);
        debug!(watcher = %id, name = %self.registry.get(id).map_or("", |e| e.name.as_str()), "watcher registered");
        id
    }

    /// Unregisters a watcher.
    ///
    /// Its placed descriptor slots are neutralized at once. Outside
    /// dispatch the watcher is finalized before this returns; inside a
    /// callback finalization waits for the next tidy point. A second call
    /// for the same watcher is logged and ignored.
    pub fn unregister(&mut self, id: WatcherId, mode: UnregisterMode) -> Result<()> {
        if !self.registry.condemn(id, mode)? {
            return Ok(());
        }

        if let Some(entry) = self.registry.get_mut(id) {
            for fd_entry in &mut entry.fds {
                if let ArrayIndex::Slot(slot) = fd_entry.index {
                    self.poll_array.vacate(slot);
                    fd_entry.index = ArrayIndex::Detached;
                }
            }
        }

        self.tidy();
        Ok(())
    }

    pub fn set_role(&mut self, id: WatcherId, role: Role) -> Result<()> {
        self.registry.set_role(id, role)
    }

    /// Reclaims the object of a watcher finalized with
    /// [`UnregisterMode::UnlinkOnly`] or [`UnregisterMode::UnlinkAndDestruct`].
    ///
    /// Those objects stay parked in the reactor until reclaimed here or the
    /// reactor is dropped. Callers using either mode must reclaim.
    pub fn take_released(&mut self, id: WatcherId) -> Option<Box<dyn Watcher>> {
        self.registry.take_released(id)
    }

    /// Finalized watcher objects waiting for [`Reactor::take_released`].
    pub fn released_count(&self) -> usize {
        self.registry.released_len()
    }

    /// Whether `id` names a watcher that has not been unregistered.
    pub fn is_registered(&self, id: WatcherId) -> bool {
        self.registry.is_alive(id)
    }

    /// Registered watchers, including condemned ones awaiting finalization.
    pub fn watcher_count(&self) -> usize {
        self.registry.len()
    }

    // --- Descriptors ---

    /// Adds or updates a descriptor interest of watcher `id`.
    ///
    /// Polling an fd the watcher already polls replaces its interest and
    /// tag and returns the existing handle. An empty interest keeps the
    /// entry but takes it out of the poll array.
    pub fn poll_fd(&mut self, id: WatcherId, fd: RawFd, interest: Interest, tag: usize) -> Result<FdHandle> {
        let entry = self.registry.alive_entry_mut(id)?;

        if let Some(existing) = entry.fds.iter_mut().find(|e| e.fd == fd) {
            existing.interest = interest;
            existing.tag = tag;

            let handle = FdHandle {
                watcher: id,
                serial: existing.serial,
            };

            existing.index = match existing.index {
                ArrayIndex::Slot(slot) if !interest.is_empty() => {
                    self.poll_array.update(slot, interest);
                    ArrayIndex::Slot(slot)
                }
                ArrayIndex::Slot(slot) => {
                    self.poll_array.vacate(slot);
                    ArrayIndex::Detached
                }
                index if interest.is_empty() => index,
                _ => place(&mut self.poll_array, handle, fd, interest),
            };

            return Ok(handle);
        }

        let handle = FdHandle {
            watcher: id,
            serial: entry.next_serial(),
        };
        let index = if interest.is_empty() {
            ArrayIndex::Unassigned
        } else {
            place(&mut self.poll_array, handle, fd, interest)
        };

        entry.fds.push(FdEntry {
            serial: handle.serial,
            fd,
            interest,
            tag,
            index,
        });

        trace!(watcher = %id, fd, ?interest, ?index, "descriptor polled");
        Ok(handle)
    }

    /// Removes a descriptor entry of watcher `id`, by fd or by handle.
    pub fn unpoll_fd(&mut self, id: WatcherId, target: impl Into<FdTarget>) -> Result<()> {
        let target = target.into();
        let entry = self.registry.alive_entry_mut(id)?;

        // Serials are per watcher; a peer's handle names none of ours.
        if let FdTarget::Handle(handle) = target
            && handle.watcher != id
        {
            warn!(watcher = %id, owner = %handle.watcher, "unpoll with a handle owned by another watcher");
            return Err(Error::UnknownDescriptor(id));
        }

        let Some(position) = entry.fds.iter().position(|e| e.matches(target)) else {
            warn!(watcher = %id, ?target, "unpoll of unknown descriptor");
            return Err(Error::UnknownDescriptor(id));
        };

        let removed = entry.fds.remove(position);
        if let ArrayIndex::Slot(slot) = removed.index {
            self.poll_array.vacate(slot);
        }

        trace!(watcher = %id, fd = removed.fd, "descriptor unpolled");
        Ok(())
    }

    /// Recompacts the poll array from every alive watcher's entries.
    fn rebuild(&mut self) -> Result<()> {
        let live = self
            .registry
            .alive()
            .flat_map(|(_, entry)| entry.fds.iter())
            .filter(|fd_entry| !fd_entry.interest.is_empty())
            .count();

        self.poll_array.begin_rebuild(live)?;

        for index in 0..self.registry.order().len() {
            let Some(id) = self.registry.id_at(index) else {
                break;
            };
            let Some(entry) = self.registry.get_mut(id) else {
                continue;
            };

            let alive = entry.is_alive();
            for fd_entry in &mut entry.fds {
                if !alive || fd_entry.interest.is_empty() {
                    fd_entry.index = ArrayIndex::Unassigned;
                    continue;
                }

                let handle = FdHandle {
                    watcher: id,
                    serial: fd_entry.serial,
                };
                let slot = self.poll_array.push(handle, fd_entry.fd, fd_entry.interest);
                fd_entry.index = ArrayIndex::Slot(slot);
            }
        }

        self.poll_array.finish_rebuild();
        self.stats.rebuilds += 1;

        debug!(live, capacity = self.poll_array.capacity(), "poll array rebuilt");
        Ok(())
    }

    /// Drops an entry whose descriptor `poll(2)` reported as invalid and
    /// closes the descriptor.
    fn discard_invalid(&mut self, slot: usize, handle: FdHandle) {
        let fd = self.poll_array.slot_fd(slot);
        self.poll_array.vacate(slot);

        if let Some(entry) = self.registry.get_mut(handle.watcher) {
            entry.fds.retain(|e| e.serial != handle.serial);
        }

        warn!(watcher = %handle.watcher, fd, "invalid descriptor in poll array, closing");
        if let Err(e) = sys_close(fd) {
            debug!(fd, error = %e, "close of invalid descriptor failed");
        }
    }

    // --- Timers ---

    /// Installs a timer on watcher `id`.
    ///
    /// `None` installs it disabled. An enabled timer starts a full period
    /// away, moved by `align` when a compatible timer exists.
    pub fn install_timer(
        &mut self,
        id: WatcherId,
        period: Option<Duration>,
        align: AlignPolicy,
        tag: usize,
    ) -> Result<TimerId> {
        self.registry.alive_entry_mut(id)?;
        self.advance_clock();

        let serial = self.registry.alive_entry_mut(id)?.next_serial();
        let timer = TimerId { watcher: id, serial };
        let remaining = self.initial_remaining(timer, period, align);

        self.registry.alive_entry_mut(id)?.timers.push(TimerEntry {
            serial,
            period,
            remaining,
            align,
            tag,
        });

        trace!(?timer, ?period, ?remaining, "timer installed");
        Ok(timer)
    }

    /// Changes a timer's period and restarts its countdown. `None`
    /// disables it.
    pub fn update_timer(&mut self, timer: TimerId, period: Option<Duration>) -> Result<()> {
        self.timer_mut(timer)?;
        self.advance_clock();

        let align = self.timer_mut(timer)?.align;
        let remaining = self.initial_remaining(timer, period, align);

        let entry = self.timer_mut(timer)?;
        entry.period = period;
        entry.remaining = remaining;
        Ok(())
    }

    /// Restarts a timer's countdown from its full period.
    pub fn reset_timer(&mut self, timer: TimerId) -> Result<()> {
        self.timer_mut(timer)?;
        self.advance_clock();

        let entry = self.timer_mut(timer)?;
        let (period, align) = (entry.period, entry.align);
        let remaining = self.initial_remaining(timer, period, align);

        self.timer_mut(timer)?.remaining = remaining;
        Ok(())
    }

    pub fn kill_timer(&mut self, timer: TimerId) -> Result<()> {
        let entry = self.registry.alive_entry_mut(timer.watcher)?;
        let Some(position) = entry.timers.iter().position(|t| t.serial == timer.serial) else {
            return Err(Error::UnknownTimer(timer));
        };

        entry.timers.remove(position);
        Ok(())
    }

    pub fn kill_all_timers(&mut self, id: WatcherId) -> Result<()> {
        self.registry.alive_entry_mut(id)?.timers.clear();
        Ok(())
    }

    /// Time left until the timer fires, `None` when it is disabled.
    pub fn timer_remaining(&self, timer: TimerId) -> Result<Option<Duration>> {
        let entry = self.timer(timer)?;
        let elapsed = self.last_tick.elapsed();
        Ok(entry.period.map(|_| entry.remaining.saturating_sub(elapsed)))
    }

    pub fn timer_period(&self, timer: TimerId) -> Result<Option<Duration>> {
        Ok(self.timer(timer)?.period)
    }

    fn timer(&self, timer: TimerId) -> Result<&TimerEntry> {
        let entry = self
            .registry
            .get(timer.watcher)
            .filter(|entry| entry.is_alive())
            .ok_or(Error::UnknownWatcher(timer.watcher))?;

        entry
            .timers
            .iter()
            .find(|t| t.serial == timer.serial)
            .ok_or(Error::UnknownTimer(timer))
    }

    fn timer_mut(&mut self, timer: TimerId) -> Result<&mut TimerEntry> {
        self.registry
            .alive_entry_mut(timer.watcher)?
            .timers
            .iter_mut()
            .find(|t| t.serial == timer.serial)
            .ok_or(Error::UnknownTimer(timer))
    }

    /// Subtracts the time since the last tick from every enabled timer.
    fn advance_clock(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        if elapsed.is_zero() {
            return;
        }

        for entry in self.registry.entries_mut() {
            for timer in &mut entry.timers {
                timer.advance(elapsed);
            }
        }
    }

    /// Full-period countdown for `timer`, aligned with the other timers.
    fn initial_remaining(&self, timer: TimerId, period: Option<Duration>, policy: AlignPolicy) -> Duration {
        let Some(period) = period else {
            return Duration::ZERO;
        };

        let partners = self.registry.alive().flat_map(move |(id, entry)| {
            entry
                .timers
                .iter()
                .filter(move |t| !(id == timer.watcher && t.serial == timer.serial))
                .filter_map(|t| t.period.map(|p| (p, t.remaining)))
        });

        let params = AlignParams {
            nearest_bias_percent: self.config.nearest_bias_percent,
            max_shift_percent: self.config.max_shift_percent,
        };

        align(period, period, policy, partners, params)
    }

    /// Smallest remaining countdown over all enabled timers.
    fn next_timeout(&self) -> Option<Duration> {
        self.registry
            .alive()
            .flat_map(|(_, entry)| entry.timers.iter())
            .filter(|t| t.is_enabled())
            .map(|t| t.remaining)
            .min()
    }

    // --- Signals ---

    /// Relayed signals of `kind` not yet dispatched.
    pub fn sig_pending(&self, kind: SignalKind) -> u32 {
        self.relay.as_ref().map_or(0, |relay| relay.pending(kind))
    }

    /// Signals discarded because the pool was full.
    pub fn dropped_signals(&self) -> u64 {
        self.relay.as_ref().map_or(0, SignalRelay::dropped)
    }

    /// Dispatches every published signal to every alive watcher, oldest
    /// first. `woke` reports the wake slot readable in the latest poll.
    fn drain_signals(&mut self, woke: bool) -> Result<()> {
        if self.relay.is_none() {
            return Ok(());
        }
        if self.active.drain {
            error!("re-entrant signal drain refused");
            return Err(Error::Reentrant("signal drain"));
        }
        self.active.drain = true;

        if let Some(relay) = self.relay.as_mut() {
            relay.rearm(woke);

            let dropped = relay.take_new_drops();
            if dropped > 0 {
                self.stats.signals_dropped += dropped;
                error!(dropped, "signal pool exhausted, signals were dropped");
            }
        }

        while let Some(record) = self.relay.as_ref().and_then(SignalRelay::front) {
            if let Some(relay) = self.relay.as_ref() {
                relay.unpend(record.signo);
            }

            match SignalKind::from_raw(record.signo) {
                Some(kind) => {
                    let event = SignalEvent {
                        kind,
                        timestamp: record.timestamp,
                        payload: record.payload,
                    };
                    self.stats.signals_dispatched += 1;
                    self.dispatch_signal(&event);
                }
                None => warn!(signo = record.signo, "unexpected signal number in relay"),
            }

            if let Some(relay) = self.relay.as_ref() {
                relay.release_front();
            }
        }

        self.active.drain = false;
        Ok(())
    }

    fn dispatch_signal(&mut self, event: &SignalEvent) {
        trace!(signal = %event.kind, pid = event.payload.pid, "dispatching signal");

        let batch = self.registry.order().len();
        for index in 0..batch {
            let Some(id) = self.registry.id_at(index) else {
                break;
            };

            self.invoke(id, |watcher, cx| {
                if watcher.on_signal(cx, event) {
                    watcher.on_legacy_signal(cx, event.kind);
                }
            });
        }
    }

    // --- Loop ---

    /// Requests termination with `code`.
    ///
    /// The current iteration stops dispatching descriptors and timers but
    /// still drains signals.
    pub fn set_quit(&mut self, code: i32) {
        if self.quit.is_none() {
            debug!(code, "quit requested");
        }
        self.quit = Some(code);
    }

    /// Runs until a quit code is set or no worker watcher remains.
    ///
    /// May be called once per reactor.
    pub fn run_loop(&mut self) -> Result<i32> {
        if self.active.iteration {
            error!("run_loop called from a callback");
            return Err(Error::Reentrant("run_loop"));
        }
        if self.ran {
            return Err(Error::AlreadyRan);
        }
        self.ran = true;

        debug!(watchers = self.registry.len(), "reactor loop started");
        loop {
            if let Some(code) = self.run_once()? {
                debug!(code, iterations = self.stats.iterations, "reactor loop finished");
                return Ok(code);
            }
        }
    }

    /// Runs one iteration, blocking at most once in `poll(2)`.
    ///
    /// Returns `Some(code)` once the loop should end: a quit code was set
    /// or only the timeout manager (or nobody) is left.
    pub fn run_once(&mut self) -> Result<Option<i32>> {
        if self.active.iteration {
            error!("re-entrant run_once refused");
            return Err(Error::Reentrant("run_once"));
        }

        self.active.iteration = true;
        let result = self.iterate();
        self.active.iteration = false;

        result
    }

    fn iterate(&mut self) -> Result<Option<i32>> {
        self.tidy();
        if let Some(code) = self.exit_code() {
            return Ok(Some(code));
        }
        self.stats.iterations += 1;

        if let Some(manager) = self.registry.manager() {
            self.invoke(manager, |watcher, cx| watcher.on_compute_timeout(cx));
            self.tidy();
        }

        self.drain_signals(false)?;
        self.tidy();
        if let Some(code) = self.exit_code() {
            return Ok(Some(code));
        }

        self.advance_clock();
        let timeout = self.next_timeout();
        self.stats.last_timeout = timeout;

        if self.poll_array.is_dirty()
            && let Err(e) = self.rebuild()
        {
            return self.rebuild_failed(e);
        }

        trace!(?timeout, slots = self.poll_array.used(), "polling");
        let mut ready = match self.poll_array.poll(timeout) {
            Ok(ready) => ready,
            Err(e) => return self.poll_failed(e),
        };

        let woke = self.poll_array.wake_ready();
        if woke {
            ready = ready.saturating_sub(1);
        }

        self.dispatch_readiness(ready)?;
        self.tidy();

        self.drain_signals(woke)?;
        self.tidy();

        if self.quit.is_none() {
            self.dispatch_timers()?;
            self.tidy();
        }

        self.drain_signals(false)?;
        self.tidy();

        Ok(self.quit)
    }

    /// Backs off and skips the iteration when the array could not grow.
    fn rebuild_failed(&mut self, e: Error) -> Result<Option<i32>> {
        match e {
            Error::PollArrayAlloc(slots) => {
                error!(slots, backoff = ?self.config.low_memory_backoff, "poll array allocation failed");
                thread::sleep(self.config.low_memory_backoff);
                Ok(None)
            }
            e => Err(e),
        }
    }

    fn poll_failed(&mut self, e: io::Error) -> Result<Option<i32>> {
        match e.kind() {
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Ok(None),
            _ if e.raw_os_error() == Some(libc::ENOMEM) => {
                warn!(backoff = ?self.config.low_memory_backoff, "poll out of memory");
                thread::sleep(self.config.low_memory_backoff);
                Ok(None)
            }
            _ => {
                error!(error = %e, "poll failed");
                Err(Error::Poll(e))
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.quit
            .or_else(|| (!self.registry.has_workers()).then_some(0))
    }

    fn dispatch_readiness(&mut self, mut ready: usize) -> Result<()> {
        if self.active.dispatch {
            error!("re-entrant descriptor dispatch refused");
            return Err(Error::Reentrant("descriptor dispatch"));
        }
        self.active.dispatch = true;

        let used = self.poll_array.used();
        for slot in 0..used {
            if ready == 0 || self.quit.is_some() {
                break;
            }

            let revents = self.poll_array.revents(slot);
            if revents == 0 {
                continue;
            }
            ready -= 1;

            let Some(handle) = self.poll_array.owner(slot) else {
                continue;
            };

            if self.poll_array.is_invalid(slot) {
                self.discard_invalid(slot, handle);
                continue;
            }

            let Some(fd_entry) = self
                .registry
                .get(handle.watcher)
                .filter(|entry| entry.is_alive())
                .and_then(|entry| entry.fds.iter().find(|e| e.serial == handle.serial))
                .filter(|e| e.index == ArrayIndex::Slot(slot))
            else {
                continue;
            };

            let mut event = Event::from_revents(revents);
            event.readable &= fd_entry.interest.read;
            event.writable &= fd_entry.interest.write;
            if event.is_empty() {
                continue;
            }

            let (fd, tag) = (fd_entry.fd, fd_entry.tag);
            self.stats.fd_dispatches += 1;
            self.invoke(handle.watcher, |watcher, cx| watcher.on_fd_ready(cx, fd, event, tag));
        }

        self.active.dispatch = false;
        Ok(())
    }

    fn dispatch_timers(&mut self) -> Result<()> {
        if self.active.dispatch {
            error!("re-entrant timer dispatch refused");
            return Err(Error::Reentrant("timer dispatch"));
        }
        self.active.dispatch = true;

        self.advance_clock();

        let expired: Vec<TimerId> = self
            .registry
            .alive()
            .flat_map(|(id, entry)| {
                entry
                    .timers
                    .iter()
                    .filter(|t| t.is_expired())
                    .map(move |t| TimerId {
                        watcher: id,
                        serial: t.serial,
                    })
            })
            .collect();

        for timer in expired {
            if self.quit.is_some() {
                break;
            }

            // An earlier callback may have killed, reset or disabled it.
            let Some((period, align, tag)) = self
                .timer_mut(timer)
                .ok()
                .filter(|t| t.is_expired())
                .map(|t| (t.period, t.align, t.tag))
            else {
                continue;
            };

            let remaining = self.initial_remaining(timer, period, align);
            if let Ok(entry) = self.timer_mut(timer) {
                entry.remaining = remaining;
            }

            self.stats.timer_fires += 1;
            self.invoke(timer.watcher, |watcher, cx| watcher.on_timer_fired(cx, timer, tag));
        }

        self.active.dispatch = false;
        Ok(())
    }

    /// Runs `f` on a checked-out watcher with a [`Context`] for it.
    ///
    /// Returns `None` when the watcher is gone or condemned.
    fn invoke<R>(&mut self, id: WatcherId, f: impl FnOnce(&mut dyn Watcher, &mut Context<'_>) -> R) -> Option<R> {
        let mut watcher = self.registry.checkout(id)?;

        self.depth += 1;
        let result = {
            let mut cx = Context::new(self, id);
            f(watcher.as_mut(), &mut cx)
        };
        self.depth -= 1;

        self.registry.checkin(id, watcher);
        Some(result)
    }

    /// Finalizes condemned watchers unless a callback is on the stack.
    fn tidy(&mut self) {
        if self.depth == 0 && self.registry.has_condemned() {
            self.registry.sweep();
        }
    }
}

/// Writes a new interest into the array, or defers it to the next rebuild.
fn place(poll_array: &mut PollArray, handle: FdHandle, fd: RawFd, interest: Interest) -> ArrayIndex {
    match poll_array.try_place(handle, fd, interest) {
        Some(slot) => ArrayIndex::Slot(slot),
        None => {
            poll_array.mark_dirty();
            ArrayIndex::Unassigned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl Watcher for Idle {}

    fn reactor(chunk: usize) -> Reactor {
        ReactorBuilder::new()
            .without_signals()
            .poll_chunk(chunk)
            .build()
            .unwrap()
    }

    /// Every alive entry with a non-empty interest owns exactly the slot it
    /// claims, and no slot is owned twice.
    fn assert_consistent(reactor: &Reactor) {
        assert!(!reactor.poll_array.is_dirty());

        let mut placed = 0;
        for (id, entry) in reactor.registry.alive() {
            for fd_entry in &entry.fds {
                if fd_entry.interest.is_empty() {
                    assert_eq!(fd_entry.index, ArrayIndex::Unassigned);
                    continue;
                }

                let ArrayIndex::Slot(slot) = fd_entry.index else {
                    panic!("fd {} not placed: {:?}", fd_entry.fd, fd_entry.index);
                };
                let handle = FdHandle {
                    watcher: id,
                    serial: fd_entry.serial,
                };
                assert_eq!(reactor.poll_array.owner(slot), Some(handle));
                assert_eq!(reactor.poll_array.slot_fd(slot), fd_entry.fd);
                assert_eq!(reactor.poll_array.slot_events(slot), fd_entry.interest.poll_events());
                placed += 1;
            }
        }

        let owned = (0..reactor.poll_array.used())
            .filter(|&slot| reactor.poll_array.owner(slot).is_some())
            .count();
        assert_eq!(owned, placed);
    }

    fn rebuild_if_dirty(reactor: &mut Reactor) {
        if reactor.poll_array.is_dirty() {
            reactor.rebuild().unwrap();
        }
    }

    #[test]
    fn test_fast_path_placement() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);

        reactor.poll_fd(a, 10, Interest::READ, 0).unwrap();
        reactor.poll_fd(a, 11, Interest::WRITE, 0).unwrap();

        assert!(!reactor.poll_array.is_dirty());
        assert_consistent(&reactor);
    }

    #[test]
    fn test_update_in_place_and_to_zero() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);

        let handle = reactor.poll_fd(a, 10, Interest::READ, 1).unwrap();
        let again = reactor.poll_fd(a, 10, Interest::BOTH, 2).unwrap();
        assert_eq!(handle, again);
        assert!(!reactor.poll_array.is_dirty());
        assert_consistent(&reactor);

        reactor.poll_fd(a, 10, Interest::NONE, 2).unwrap();
        assert!(reactor.poll_array.is_dirty());
        assert_eq!(
            reactor.registry.get(a).unwrap().fds[0].index,
            ArrayIndex::Detached
        );

        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);
        assert_eq!(reactor.poll_array.used(), 0);
    }

    #[test]
    fn test_overflow_marks_dirty_then_rebuild_grows() {
        let mut reactor = reactor(2);
        let a = reactor.register(Idle);

        for fd in 10..15 {
            reactor.poll_fd(a, fd, Interest::READ, 0).unwrap();
        }
        assert!(reactor.poll_array.is_dirty());

        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);
        assert_eq!(reactor.poll_array.used(), 5);
        assert_eq!(reactor.poll_array.capacity(), 6);
    }

    #[test]
    fn test_unpoll_and_unregister_neutralize_slots() {
        let mut reactor = reactor(8);
        let a = reactor.register(Idle);
        let b = reactor.register(Idle);

        let handle = reactor.poll_fd(a, 10, Interest::READ, 0).unwrap();
        reactor.poll_fd(a, 11, Interest::READ, 0).unwrap();
        reactor.poll_fd(b, 12, Interest::WRITE, 0).unwrap();

        reactor.unpoll_fd(a, handle).unwrap();
        assert!(reactor.poll_array.is_dirty());
        assert!(matches!(
            reactor.unpoll_fd(a, handle),
            Err(Error::UnknownDescriptor(_))
        ));
        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);

        reactor.unregister(a, UnregisterMode::UnlinkDestructAndFree).unwrap();
        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);
        assert_eq!(reactor.poll_array.used(), 1);
        assert_eq!(reactor.poll_array.slot_fd(0), 12);
    }

    #[test]
    fn test_add_while_dirty_waits_for_rebuild() {
        let mut reactor = reactor(8);
        let a = reactor.register(Idle);

        reactor.poll_fd(a, 10, Interest::READ, 0).unwrap();
        reactor.unpoll_fd(a, 10).unwrap();
        reactor.poll_fd(a, 11, Interest::READ, 0).unwrap();

        assert_eq!(
            reactor.registry.get(a).unwrap().fds[0].index,
            ArrayIndex::Unassigned
        );
        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);
    }

    #[test]
    fn test_condemned_watcher_refuses_operations() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);
        reactor.unregister(a, UnregisterMode::UnlinkOnly).unwrap();

        assert!(matches!(
            reactor.poll_fd(a, 10, Interest::READ, 0),
            Err(Error::UnknownWatcher(_))
        ));
        assert_eq!(reactor.released_count(), 1);
        assert!(reactor.take_released(a).is_some());
        assert_eq!(reactor.released_count(), 0);
    }

    #[test]
    fn test_unregister_twice_outside_dispatch() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);

        reactor.unregister(a, UnregisterMode::UnlinkDestructAndFree).unwrap();
        assert!(!reactor.is_registered(a));
        assert!(reactor.unregister(a, UnregisterMode::UnlinkDestructAndFree).is_ok());
        assert!(reactor.unregister(a, UnregisterMode::UnlinkOnly).is_ok());
        assert_eq!(reactor.watcher_count(), 0);
        assert_eq!(reactor.released_count(), 0);
    }

    #[test]
    fn test_unpoll_rejects_peer_handle() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);
        let b = reactor.register(Idle);

        let a_handle = reactor.poll_fd(a, 10, Interest::READ, 0).unwrap();
        let b_handle = reactor.poll_fd(b, 20, Interest::READ, 0).unwrap();
        assert_eq!(a_handle.serial, b_handle.serial);

        assert!(matches!(
            reactor.unpoll_fd(b, a_handle),
            Err(Error::UnknownDescriptor(id)) if id == b
        ));
        assert!(!reactor.poll_array.is_dirty());
        assert_consistent(&reactor);

        reactor.unpoll_fd(b, 20).unwrap();
        reactor.unpoll_fd(a, a_handle).unwrap();
        rebuild_if_dirty(&mut reactor);
        assert_consistent(&reactor);
        assert_eq!(reactor.poll_array.used(), 0);
    }

    fn backoff_reactor() -> Reactor {
        ReactorBuilder::new()
            .without_signals()
            .low_memory_backoff(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_transient_poll_errors_skip_iteration() {
        let mut reactor = backoff_reactor();

        for errno in [libc::EINTR, libc::EAGAIN, libc::ENOMEM] {
            let result = reactor.poll_failed(io::Error::from_raw_os_error(errno));
            assert!(matches!(result, Ok(None)), "errno {errno}: {result:?}");
        }
    }

    #[test]
    fn test_fatal_poll_error_surfaces() {
        let mut reactor = backoff_reactor();

        let result = reactor.poll_failed(io::Error::from_raw_os_error(libc::EBADF));
        assert!(matches!(
            result,
            Err(Error::Poll(e)) if e.raw_os_error() == Some(libc::EBADF)
        ));
    }

    #[test]
    fn test_rebuild_allocation_failure_backs_off() {
        let mut reactor = backoff_reactor();

        assert!(matches!(reactor.rebuild_failed(Error::PollArrayAlloc(1 << 20)), Ok(None)));
        assert!(matches!(
            reactor.rebuild_failed(Error::InvalidConfig("poll_chunk")),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_timer_remaining_never_exceeds_period() {
        let mut reactor = reactor(4);
        let a = reactor.register(Idle);

        let fast = reactor
            .install_timer(a, Some(Duration::from_millis(100)), AlignPolicy::none(), 0)
            .unwrap();
        let slow = reactor
            .install_timer(a, Some(Duration::from_millis(300)), AlignPolicy::nearest(), 0)
            .unwrap();

        for timer in [fast, slow] {
            let period = reactor.timer_period(timer).unwrap().unwrap();
            let remaining = reactor.timer_remaining(timer).unwrap().unwrap();
            assert!(remaining <= period);
        }

        reactor.update_timer(fast, None).unwrap();
        assert_eq!(reactor.timer_remaining(fast).unwrap(), None);
        assert_eq!(reactor.next_timeout().map(|t| t <= Duration::from_millis(300)), Some(true));

        reactor.kill_timer(slow).unwrap();
        assert!(matches!(reactor.kill_timer(slow), Err(Error::UnknownTimer(_))));
        assert_eq!(reactor.next_timeout(), None);
    }
}
