use libc::{POLLIN, POLLOUT};

/// Readiness interest for a descriptor entry.
///
/// An empty interest keeps the entry registered with its watcher but out of
/// the poll array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    /// Converts the interest into `pollfd.events` bits.
    pub(crate) fn poll_events(self) -> i16 {
        let mut events = 0;

        if self.read {
            events |= POLLIN;
        }
        if self.write {
            events |= POLLOUT;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_events() {
        assert_eq!(Interest::NONE.poll_events(), 0);
        assert_eq!(Interest::READ.poll_events(), POLLIN);
        assert_eq!(Interest::WRITE.poll_events(), POLLOUT);
        assert_eq!(Interest::BOTH.poll_events(), POLLIN | POLLOUT);
        assert!(Interest::NONE.is_empty());
        assert!(!Interest::WRITE.is_empty());
    }
}
