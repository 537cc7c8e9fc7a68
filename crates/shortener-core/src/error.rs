//! Shortener error types.

use std::io;

use thiserror::Error;

/// Failures of the readiness/wake-up layer.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Creating the epoll/timerfd/signalfd/eventfd descriptor failed.
    #[error("{what} setup failed: {source}")]
    Setup { what: &'static str, source: io::Error },
    /// epoll_ctl failed for a descriptor.
    #[error("control of fd {fd} failed: {source}")]
    Control { fd: i32, source: io::Error },
    /// The wait call itself failed (not EINTR).
    #[error("wait failed: {0}")]
    Wait(io::Error),
    /// Writing to a wake-up descriptor failed.
    #[error("notify failed: {0}")]
    Notify(io::Error),
    /// The platform has no multiplexer implementation.
    #[error("readiness multiplexing is not supported on this platform")]
    Unsupported,
}

pub type MuxResult<T> = std::result::Result<T, MuxError>;
