//! Placeholder for platforms without a multiplexer implementation.
//! Construction fails, so the server reports a fatal startup error.

use std::os::fd::RawFd;
use std::time::Duration;

use shortener_core::error::{MuxError, MuxResult};
use shortener_core::event::{Event, Interest, Token, Trigger};
use shortener_core::multiplexer::Multiplexer;

pub struct UnsupportedMultiplexer(());

impl UnsupportedMultiplexer {
    pub fn new() -> MuxResult<Self> {
        Err(MuxError::Unsupported)
    }

    pub fn with_capacity(_events: usize) -> MuxResult<Self> {
        Err(MuxError::Unsupported)
    }
}

impl Multiplexer for UnsupportedMultiplexer {
    fn register(&mut self, _: RawFd, _: Interest, _: Trigger, _: Token) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn reregister(&mut self, _: RawFd, _: Interest, _: Trigger, _: Token) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn deregister(&mut self, _: RawFd) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn add_timer(&mut self, _: Duration, _: Token) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn add_signals(&mut self, _: &[i32], _: Token) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn add_wakeup(&mut self, _: RawFd, _: Token) -> MuxResult<()> {
        Err(MuxError::Unsupported)
    }

    fn wait(&mut self, _: &mut Vec<Event>, _: Option<Duration>) -> MuxResult<usize> {
        Err(MuxError::Unsupported)
    }
}
