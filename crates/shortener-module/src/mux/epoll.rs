//! `EpollMultiplexer`: Linux `Multiplexer` implementation.
//!
//! Sockets go straight into epoll. Timers are timerfds, signals a signalfd,
//! wake-ups an eventfd; all three are themselves registered with epoll and
//! drained here, so callers only ever see `Timer`/`Signal`/`Wake` events.
//!
//! The epoll user data carries the source kind and a payload:
//! `[kind:8][unused:24][payload:32]`. For sockets the payload is the
//! caller's token, for the other kinds an index into `sources`.
//!
//! epoll reports no byte counts, so socket events carry `data() == 0`.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use shortener_core::error::{MuxError, MuxResult};
use shortener_core::event::{Event, EventKind, Interest, Token, Trigger};
use shortener_core::multiplexer::Multiplexer;

use super::sigset_of;

const KIND_IO: u64 = 0 << 56;
const KIND_TIMER: u64 = 1 << 56;
const KIND_SIGNAL: u64 = 2 << 56;
const KIND_WAKE: u64 = 3 << 56;
const KIND_MASK: u64 = 0xFF << 56;
const PAYLOAD_MASK: u64 = 0xFFFF_FFFF;

fn make_data(kind: u64, payload: usize) -> u64 {
    kind | (payload as u64 & PAYLOAD_MASK)
}
fn decode_kind(data: u64) -> u64 {
    data & KIND_MASK
}
fn decode_payload(data: u64) -> usize {
    (data & PAYLOAD_MASK) as usize
}

const DEFAULT_BATCH: usize = 64;

/// A non-socket source owned (or borrowed) by the multiplexer.
struct Source {
    fd: RawFd,
    token: Token,
    /// Set when the multiplexer created the fd and must close it.
    _owned: Option<OwnedFd>,
}

pub struct EpollMultiplexer {
    epfd: OwnedFd,
    raw: Vec<libc::epoll_event>,
    sources: Vec<Source>,
    /// Socket fds by token, for `SO_ERROR` lookups on error events.
    sockets: HashMap<Token, RawFd>,
}

impl EpollMultiplexer {
    pub fn new() -> MuxResult<Self> {
        Self::with_capacity(DEFAULT_BATCH)
    }

    /// `batch` bounds how many events one `wait` can return.
    pub fn with_capacity(batch: usize) -> MuxResult<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(MuxError::Setup { what: "epoll", source: io::Error::last_os_error() });
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            epfd,
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; batch.max(1)],
            sources: Vec::new(),
            sockets: HashMap::new(),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, data: u64) -> MuxResult<()> {
        let mut ev = libc::epoll_event { events, u64: data };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(MuxError::Control { fd, source: io::Error::last_os_error() });
        }
        Ok(())
    }

    fn add_source(&mut self, kind: u64, fd: RawFd, token: Token, owned: Option<OwnedFd>) -> MuxResult<()> {
        let idx = self.sources.len();
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32, make_data(kind, idx))?;
        self.sources.push(Source { fd, token, _owned: owned });
        Ok(())
    }

    fn io_events(&self, data: u64, flags: u32, out: &mut Vec<Event>) {
        let token = Token(decode_payload(data));
        let hangup = flags & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0;
        let failed = flags & libc::EPOLLERR as u32 != 0;

        if failed || hangup {
            let error = if failed {
                self.sockets.get(&token).map(|&fd| socket_error(fd)).unwrap_or(libc::EIO)
            } else {
                0
            };
            out.push(Event::io(EventKind::Read, token, 0, hangup, error));
            return;
        }
        if flags & libc::EPOLLIN as u32 != 0 {
            out.push(Event::io(EventKind::Read, token, 0, false, 0));
        }
        if flags & libc::EPOLLOUT as u32 != 0 {
            out.push(Event::io(EventKind::Write, token, 0, false, 0));
        }
    }
}

fn interest_flags(interest: Interest, trigger: Trigger) -> u32 {
    let mut flags = 0i32;
    if interest.is_readable() {
        flags |= libc::EPOLLIN;
        if interest != Interest::AcceptReadable {
            flags |= libc::EPOLLRDHUP;
        }
    }
    if interest.is_writable() {
        flags |= libc::EPOLLOUT;
    }
    if trigger == Trigger::Edge {
        flags |= libc::EPOLLET;
    }
    flags as u32
}

/// Pending `SO_ERROR` of a socket.
fn socket_error(fd: RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(fd, libc::SOL_SOCKET, libc::SO_ERROR, &mut err as *mut _ as *mut libc::c_void, &mut len)
    };
    if ret < 0 || err == 0 {
        libc::EIO
    } else {
        err
    }
}

/// Read one 8-byte counter (timerfd / eventfd). `None` when nothing is pending.
fn read_counter(fd: RawFd) -> Option<u64> {
    let mut val: u64 = 0;
    let n = unsafe { libc::read(fd, &mut val as *mut u64 as *mut libc::c_void, mem::size_of::<u64>()) };
    (n == mem::size_of::<u64>() as isize).then_some(val)
}

impl Multiplexer for EpollMultiplexer {
    fn register(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, token: Token) -> MuxResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest_flags(interest, trigger), make_data(KIND_IO, token.0))?;
        self.sockets.insert(token, fd);
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, interest: Interest, trigger: Trigger, token: Token) -> MuxResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest_flags(interest, trigger), make_data(KIND_IO, token.0))?;
        self.sockets.retain(|_, &mut v| v != fd);
        self.sockets.insert(token, fd);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> MuxResult<()> {
        self.sockets.retain(|_, &mut v| v != fd);
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    fn add_timer(&mut self, interval: Duration, token: Token) -> MuxResult<()> {
        // A zero interval would disarm the timer.
        let interval = interval.max(Duration::from_millis(1));

        let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
        if fd < 0 {
            return Err(MuxError::Setup { what: "timerfd", source: io::Error::last_os_error() });
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
        spec.it_interval.tv_sec = interval.as_secs() as libc::time_t;
        spec.it_interval.tv_nsec = interval.subsec_nanos() as libc::c_long;
        spec.it_value = spec.it_interval;
        let ret = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(MuxError::Setup { what: "timerfd", source: io::Error::last_os_error() });
        }

        self.add_source(KIND_TIMER, fd, token, Some(owned))
    }

    fn add_signals(&mut self, signals: &[i32], token: Token) -> MuxResult<()> {
        let set = sigset_of(signals)?;
        let fd = unsafe { libc::signalfd(-1, set.as_ref(), libc::SFD_NONBLOCK | libc::SFD_CLOEXEC) };
        if fd < 0 {
            return Err(MuxError::Setup { what: "signalfd", source: io::Error::last_os_error() });
        }
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        self.add_source(KIND_SIGNAL, fd, token, Some(owned))
    }

    fn add_wakeup(&mut self, fd: RawFd, token: Token) -> MuxResult<()> {
        self.add_source(KIND_WAKE, fd, token, None)
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> MuxResult<usize> {
        events.clear();

        let ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };
        let n = unsafe {
            libc::epoll_wait(self.epfd.as_raw_fd(), self.raw.as_mut_ptr(), self.raw.len() as libc::c_int, ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(MuxError::Wait(err));
        }

        for i in 0..n as usize {
            let ev = self.raw[i];
            let (flags, data) = (ev.events, ev.u64);

            match decode_kind(data) {
                KIND_IO => self.io_events(data, flags, events),
                KIND_TIMER => {
                    let src = &self.sources[decode_payload(data)];
                    if let Some(expirations) = read_counter(src.fd) {
                        events.push(Event::timer(src.token, expirations));
                    }
                }
                KIND_SIGNAL => {
                    let src = &self.sources[decode_payload(data)];
                    loop {
                        let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
                        let size = mem::size_of::<libc::signalfd_siginfo>();
                        let n = unsafe { libc::read(src.fd, &mut info as *mut _ as *mut libc::c_void, size) };
                        if n != size as isize {
                            break;
                        }
                        events.push(Event::signal(src.token, info.ssi_signo as i32));
                    }
                }
                KIND_WAKE => {
                    let src = &self.sources[decode_payload(data)];
                    let _ = read_counter(src.fd);
                    events.push(Event::wake(src.token));
                }
                _ => {}
            }
        }

        Ok(events.len())
    }
}
