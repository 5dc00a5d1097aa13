use libc::{POLLERR, POLLHUP, POLLIN, POLLOUT, POLLPRI};

/// Readiness reported for one descriptor entry.
///
/// An `Event` is built from the `revents` bits of the entry's poll slot,
/// already filtered by the entry's current [`Interest`](crate::Interest).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// Data (or urgent data) can be read without blocking.
    pub readable: bool,

    /// Data can be written without blocking.
    pub writable: bool,

    /// The peer closed its end.
    pub hangup: bool,

    /// An error condition is pending on the descriptor.
    pub error: bool,
}

impl Event {
    pub(crate) fn from_revents(revents: i16) -> Self {
        Self {
            readable: revents & (POLLIN | POLLPRI) != 0,
            writable: revents & POLLOUT != 0,
            hangup: revents & POLLHUP != 0,
            error: revents & POLLERR != 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.readable && !self.writable && !self.hangup && !self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_revents() {
        let event = Event::from_revents(POLLIN | POLLHUP);
        assert!(event.readable);
        assert!(event.hangup);
        assert!(!event.writable);
        assert!(!event.error);

        assert!(Event::from_revents(0).is_empty());
    }
}
