//! Readiness multiplexer abstraction.
//!
//! A `Multiplexer` wraps the host's readiness notification facility. The
//! Worker and Acceptor loops are written against this trait only.
//!
//! # Implementors
//!
//! - `EpollMultiplexer` (Linux): epoll for sockets, timerfd for periodic
//!   timers, signalfd for termination signals.
//!
//! Each instance is owned by exactly one thread; the trait therefore takes
//! `&mut self` everywhere and only requires `Send` so the instance can be
//! built on one thread and moved into its worker.

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::MuxResult;
use crate::event::{Event, Interest, Token, Trigger};

pub trait Multiplexer: Send {
    /// Start watching `fd`. Events for it carry `token`.
    fn register(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, token: Token) -> MuxResult<()>;

    /// Change interest/trigger/token of an already registered `fd`.
    fn reregister(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, token: Token) -> MuxResult<()>;

    /// Stop watching `fd`. Must be called before the fd is closed.
    fn deregister(&mut self, fd: RawFd) -> MuxResult<()>;

    /// Fire a `Timer` event every `interval`, first after one interval.
    fn add_timer(&mut self, interval: Duration, token: Token) -> MuxResult<()>;

    /// Deliver the given signals as `Signal` events instead of running their
    /// default disposition. The signals must already be blocked in every
    /// thread of the process.
    fn add_signals(&mut self, signals: &[i32], token: Token) -> MuxResult<()>;

    /// Watch a wake-up descriptor (eventfd). Its events come back as `Wake`
    /// and the counter is drained by the multiplexer.
    fn add_wakeup(&mut self, fd: RawFd, token: Token) -> MuxResult<()>;

    /// Block until at least one event is ready (or `timeout` elapses) and
    /// replace the contents of `events` with the batch. Returns its length.
    ///
    /// An interrupted wait returns `Ok(0)`.
    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> MuxResult<usize>;
}
