//! Listening socket setup: create, setsockopt, bind, listen.
//!
//! `std::net::TcpListener::bind` hard-codes the backlog, so the socket is
//! built by hand and then handed to std.

use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::FromRawFd;

/// Bind a non-blocking listener on `addr` with the given `backlog`.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // From here on the fd is closed by `listener` on every error path.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    let opt: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const libc::c_void,
            mem::size_of_val(&opt) as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let ret = match addr {
        SocketAddr::V4(v4) => {
            let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            unsafe {
                libc::bind(fd, &sa as *const _ as *const libc::sockaddr, mem::size_of_val(&sa) as libc::socklen_t)
            }
        }
        SocketAddr::V6(v6) => {
            let mut sa: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_scope_id = v6.scope_id();
            unsafe {
                libc::bind(fd, &sa as *const _ as *const libc::sockaddr, mem::size_of_val(&sa) as libc::socklen_t)
            }
        }
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::listen(fd, backlog) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(listener)
}
