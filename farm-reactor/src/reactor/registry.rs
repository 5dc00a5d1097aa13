//! Watcher registry with deferred destruction.
//!
//! Watchers live in a generational arena. The registration order is kept in
//! a separate vector that dispatch walks by index. Unregistering only flips
//! the watcher's [`DeletionState`] and queues it on the condemned list; the
//! order vector shrinks exclusively in [`Registry::sweep`], which the reactor
//! runs at loop-safe points. An index walk over the order vector therefore
//! never skips or repeats a watcher, whatever the callbacks unregister.

use crate::error::{Error, Result};
use crate::reactor::io::FdEntry;
use crate::reactor::timer::TimerEntry;
use crate::reactor::watcher::{DeletionState, Role, UnregisterMode, Watcher, WatcherId};
use crate::utils::Arena;

use tracing::{debug, warn};

/// Parked watcher count at which each further step is reported.
const PARKED_WARN_STEP: usize = 64;

pub(crate) struct WatcherEntry {
    /// `None` while one of the watcher's callbacks is running.
    watcher: Option<Box<dyn Watcher>>,
    pub(crate) name: String,
    pub(crate) state: DeletionState,
    pub(crate) role: Role,
    pub(crate) fds: Vec<FdEntry>,
    pub(crate) timers: Vec<TimerEntry>,
    next_serial: u32,
}

impl WatcherEntry {
    pub(crate) fn is_alive(&self) -> bool {
        self.state == DeletionState::Alive
    }

    /// Serial for a new descriptor or timer entry of this watcher.
    pub(crate) fn next_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }
}

pub(crate) struct Registry {
    entries: Arena<WatcherEntry>,
    order: Vec<WatcherId>,
    condemned: Vec<WatcherId>,
    released: Vec<(WatcherId, Box<dyn Watcher>)>,
    manager: Option<WatcherId>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arena::new(16),
            order: Vec::new(),
            condemned: Vec::new(),
            released: Vec::new(),
            manager: None,
        }
    }

    pub(crate) fn insert(&mut self, watcher: Box<dyn Watcher>) -> WatcherId {
        let name = watcher.name().to_owned();
        let id = WatcherId(self.entries.insert(WatcherEntry {
            watcher: Some(watcher),
            name,
            state: DeletionState::Alive,
            role: Role::None,
            fds: Vec::new(),
            timers: Vec::new(),
            next_serial: 0,
        }));
        self.order.push(id);
        id
    }

    pub(crate) fn get(&self, id: WatcherId) -> Option<&WatcherEntry> {
        self.entries.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: WatcherId) -> Option<&mut WatcherEntry> {
        self.entries.get_mut(id.0)
    }

    /// Resolves a watcher that may still be operated on.
    pub(crate) fn alive_entry_mut(&mut self, id: WatcherId) -> Result<&mut WatcherEntry> {
        match self.entries.get_mut(id.0) {
            Some(entry) if entry.is_alive() => Ok(entry),
            Some(entry) => {
                warn!(watcher = %id, name = %entry.name, "operation on condemned watcher");
                Err(Error::Condemned(id))
            }
            None => Err(Error::UnknownWatcher(id)),
        }
    }

    pub(crate) fn is_alive(&self, id: WatcherId) -> bool {
        self.get(id).is_some_and(WatcherEntry::is_alive)
    }

    /// Registration order, including condemned watchers not yet swept.
    pub(crate) fn order(&self) -> &[WatcherId] {
        &self.order
    }

    pub(crate) fn alive(&self) -> impl Iterator<Item = (WatcherId, &WatcherEntry)> + '_ {
        self.order
            .iter()
            .filter_map(|&id| self.get(id).map(|entry| (id, entry)))
            .filter(|(_, entry)| entry.is_alive())
    }

    /// Every registered entry, condemned ones included, in slot order.
    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut WatcherEntry> + '_ {
        self.entries.values_mut()
    }

    /// The watcher at position `index` of the registration order.
    pub(crate) fn id_at(&self, index: usize) -> Option<WatcherId> {
        self.order.get(index).copied()
    }

    /// Whether any watcher other than the timeout manager is still alive.
    pub(crate) fn has_workers(&self) -> bool {
        self.alive().any(|(_, entry)| entry.role == Role::None)
    }

    pub(crate) fn manager(&self) -> Option<WatcherId> {
        self.manager
    }

    pub(crate) fn set_role(&mut self, id: WatcherId, role: Role) -> Result<()> {
        let manager = self.manager;
        let entry = self.alive_entry_mut(id)?;

        match role {
            Role::TimeoutManager => {
                if let Some(current) = manager.filter(|&m| m != id) {
                    return Err(Error::RoleTaken(current));
                }
                entry.role = Role::TimeoutManager;
                self.manager = Some(id);
            }
            Role::None => {
                entry.role = Role::None;
                if manager == Some(id) {
                    self.manager = None;
                }
            }
        }

        debug!(watcher = %id, ?role, "role changed");
        Ok(())
    }

    /// Marks a watcher for destruction.
    ///
    /// Returns `Ok(false)` when the watcher was already condemned or
    /// finalized.
    pub(crate) fn condemn(&mut self, id: WatcherId, mode: UnregisterMode) -> Result<bool> {
        if self.entries.is_retired(id.0) {
            warn!(watcher = %id, "unregister of finalized watcher ignored");
            return Ok(false);
        }

        let entry = self
            .entries
            .get_mut(id.0)
            .ok_or(Error::UnknownWatcher(id))?;

        if !entry.is_alive() {
            warn!(watcher = %id, name = %entry.name, "watcher unregistered twice");
            return Ok(false);
        }

        entry.state = mode.into();
        if self.manager == Some(id) {
            self.manager = None;
        }
        self.condemned.push(id);

        debug!(watcher = %id, ?mode, "watcher condemned");
        Ok(true)
    }

    /// Takes the watcher object out for a callback.
    ///
    /// Only alive watchers whose object is not already checked out qualify.
    pub(crate) fn checkout(&mut self, id: WatcherId) -> Option<Box<dyn Watcher>> {
        let entry = self.entries.get_mut(id.0)?;
        if !entry.is_alive() {
            return None;
        }
        entry.watcher.take()
    }

    /// Returns a watcher object after its callback.
    pub(crate) fn checkin(&mut self, id: WatcherId, watcher: Box<dyn Watcher>) {
        match self.entries.get_mut(id.0) {
            Some(entry) => entry.watcher = Some(watcher),
            None => warn!(watcher = %id, "checked-in watcher vanished"),
        }
    }

    pub(crate) fn has_condemned(&self) -> bool {
        !self.condemned.is_empty()
    }

    /// Finalizes condemned watchers.
    ///
    /// Must only run when no callback is on the stack. A watcher whose
    /// object is still checked out stays condemned until the next sweep.
    pub(crate) fn sweep(&mut self) -> usize {
        if self.condemned.is_empty() {
            return 0;
        }

        let mut finalized = 0;
        let condemned = std::mem::take(&mut self.condemned);

        for id in condemned {
            let checked_out = self
                .entries
                .get(id.0)
                .is_some_and(|entry| entry.watcher.is_none());
            if checked_out {
                self.condemned.push(id);
                continue;
            }

            let Some(entry) = self.entries.remove(id.0) else {
                continue;
            };
            self.order.retain(|&other| other != id);
            finalized += 1;

            let Some(mut watcher) = entry.watcher else {
                continue;
            };

            match entry.state {
                DeletionState::Unregistering => self.park(id, watcher),
                DeletionState::Destructing => {
                    watcher.on_destruct();
                    self.park(id, watcher);
                }
                DeletionState::DestructAndFree => watcher.on_destruct(),
                DeletionState::Alive => {}
            }

            debug!(watcher = %id, name = %entry.name, "watcher finalized");
        }

        finalized
    }

    /// Keeps a finalized watcher object until its owner reclaims it.
    fn park(&mut self, id: WatcherId, watcher: Box<dyn Watcher>) {
        self.released.push((id, watcher));
        if self.released.len() % PARKED_WARN_STEP == 0 {
            warn!(parked = self.released.len(), "released watchers are not being reclaimed");
        }
    }

    pub(crate) fn released_len(&self) -> usize {
        self.released.len()
    }

    pub(crate) fn take_released(&mut self, id: WatcherId) -> Option<Box<dyn Watcher>> {
        let position = self.released.iter().position(|(other, _)| *other == id)?;
        Some(self.released.swap_remove(position).1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
