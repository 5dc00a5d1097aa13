/// Process signals the reactor can relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// SIGHUP: controlling terminal closed, conventionally "reload".
    Hangup,
    /// SIGINT: interactive interrupt.
    Interrupt,
    /// SIGQUIT.
    Quit,
    /// SIGTERM: polite termination request.
    Terminate,
    /// SIGUSR1.
    User1,
    /// SIGUSR2.
    User2,
    /// SIGCHLD: a child process changed state.
    Child,
    /// SIGPIPE.
    Pipe,
    /// SIGALRM.
    Alarm,
    /// SIGWINCH.
    WindowChange,
}

impl SignalKind {
    pub const ALL: [SignalKind; 10] = [
        Self::Hangup,
        Self::Interrupt,
        Self::Quit,
        Self::Terminate,
        Self::User1,
        Self::User2,
        Self::Child,
        Self::Pipe,
        Self::Alarm,
        Self::WindowChange,
    ];

    /// The set a reactor relays unless configured otherwise.
    pub const DEFAULT_SET: [SignalKind; 6] = [
        Self::Hangup,
        Self::Interrupt,
        Self::Terminate,
        Self::Child,
        Self::User1,
        Self::User2,
    ];

    /// Returns the platform signal number.
    #[must_use]
    pub const fn as_raw(&self) -> i32 {
        match self {
            Self::Hangup => libc::SIGHUP,
            Self::Interrupt => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Terminate => libc::SIGTERM,
            Self::User1 => libc::SIGUSR1,
            Self::User2 => libc::SIGUSR2,
            Self::Child => libc::SIGCHLD,
            Self::Pipe => libc::SIGPIPE,
            Self::Alarm => libc::SIGALRM,
            Self::WindowChange => libc::SIGWINCH,
        }
    }

    /// Maps a platform signal number back to a kind.
    #[must_use]
    pub fn from_raw(signo: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_raw() == signo)
    }

    /// Returns the conventional name of the signal.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
            Self::User1 => "SIGUSR1",
            Self::User2 => "SIGUSR2",
            Self::Child => "SIGCHLD",
            Self::Pipe => "SIGPIPE",
            Self::Alarm => "SIGALRM",
            Self::WindowChange => "SIGWINCH",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        for kind in SignalKind::ALL {
            assert_eq!(SignalKind::from_raw(kind.as_raw()), Some(kind));
        }
        assert_eq!(SignalKind::from_raw(0), None);
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(SignalKind::Interrupt.as_raw(), libc::SIGINT);
        assert_eq!(SignalKind::Child.as_raw(), libc::SIGCHLD);
    }

    #[test]
    fn test_display() {
        assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
        assert_eq!(SignalKind::User2.name(), "SIGUSR2");
    }

    #[test]
    fn test_default_set_is_subset() {
        for kind in SignalKind::DEFAULT_SET {
            assert!(SignalKind::ALL.contains(&kind));
        }
    }
}
