//! Readiness events.
//!
//! An [`Event`] is produced only by [`Multiplexer::wait`]. Consumers read
//! it through accessors; the constructors are for multiplexer
//! implementations.
//!
//! [`Multiplexer::wait`]: crate::multiplexer::Multiplexer::wait

/// Opaque registration identifier.
///
/// For sockets it is the connection slot index; for timers, signals and
/// wake-ups it is whatever the registering code chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl Token {
    /// Sentinel that never maps to a connection slot.
    pub const NONE: Token = Token(usize::MAX);
}

/// What a registration wants to be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadWrite,
    /// Listening socket: readable means "connections pending".
    AcceptReadable,
}

impl Interest {
    #[inline]
    pub fn is_readable(self) -> bool {
        !matches!(self, Interest::Writable)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, Interest::Writable | Interest::ReadWrite)
    }
}

/// Edge-triggered registrations report a transition once; the consumer must
/// drain until `WouldBlock` before another report arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Edge,
    Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Write,
    Timer,
    Signal,
    /// A [`Notifier`](crate::notifier::Notifier) registered for wake-ups fired.
    Wake,
}

/// One ready event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    token: Token,
    data: u64,
    eof: bool,
    error: i32,
}

impl Event {
    /// Socket readiness. `data` is the number of bytes known to be
    /// available, or 0 when the platform does not report it. epoll never
    /// does, so on Linux socket events always carry 0 and consumers read
    /// until `WouldBlock`.
    pub fn io(kind: EventKind, token: Token, data: u64, eof: bool, error: i32) -> Self {
        Self { kind, token, data, eof, error }
    }

    /// Timer fired `expirations` times since the last report.
    pub fn timer(token: Token, expirations: u64) -> Self {
        Self { kind: EventKind::Timer, token, data: expirations, eof: false, error: 0 }
    }

    pub fn signal(token: Token, signo: i32) -> Self {
        Self { kind: EventKind::Signal, token, data: signo as u64, eof: false, error: 0 }
    }

    pub fn wake(token: Token) -> Self {
        Self { kind: EventKind::Wake, token, data: 0, eof: false, error: 0 }
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Byte count (Read/Write), expirations (Timer) or signal number (Signal).
    #[inline]
    pub fn data(&self) -> u64 {
        self.data
    }

    /// Peer hung up or shut down its write side.
    #[inline]
    pub fn end_of_file(&self) -> bool {
        self.eof
    }

    /// Pending socket error (errno), 0 if none.
    #[inline]
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Signal number for `Signal` events.
    #[inline]
    pub fn signo(&self) -> i32 {
        self.data as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_directions() {
        assert!(Interest::Readable.is_readable());
        assert!(!Interest::Readable.is_writable());
        assert!(Interest::ReadWrite.is_readable() && Interest::ReadWrite.is_writable());
        assert!(!Interest::Writable.is_readable());
        assert!(Interest::AcceptReadable.is_readable());
    }

    #[test]
    fn signal_event_carries_signo() {
        let ev = Event::signal(Token(7), 15);
        assert_eq!(ev.kind(), EventKind::Signal);
        assert_eq!(ev.signo(), 15);
        assert_eq!(ev.token(), Token(7));
        assert!(!ev.end_of_file());
    }
}
