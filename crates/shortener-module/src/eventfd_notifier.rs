//! `EventFdNotifier`: default `Notifier` implementation.
//!
//! The acceptor writes 1 to a worker's eventfd after pushing a connection
//! into that worker's inbox; the worker's multiplexer reports a `Wake`
//! event and drains the counter. Several notifications before the worker
//! runs collapse into one wake-up (eventfd counter semantics).

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use shortener_core::error::{MuxError, MuxResult};
use shortener_core::notifier::Notifier;

pub struct EventFdNotifier {
    fd: OwnedFd,
}

impl EventFdNotifier {
    /// Create a non-blocking, close-on-exec eventfd.
    pub fn create() -> MuxResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(MuxError::Setup { what: "eventfd", source: io::Error::last_os_error() });
        }
        Ok(Self { fd: unsafe { OwnedFd::from_raw_fd(fd) } })
    }
}

impl Notifier for EventFdNotifier {
    fn notify(&self) -> MuxResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: the counter is saturated, so a wake-up is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(MuxError::Notify(err));
        }
        Ok(())
    }

    fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
