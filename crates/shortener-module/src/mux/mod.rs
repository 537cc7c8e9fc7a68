//! Platform readiness multiplexers.
//!
//! Higher layers use [`PlatformMultiplexer`] through the
//! `shortener_core::multiplexer::Multiplexer` trait only.

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollMultiplexer;
        pub use epoll::EpollMultiplexer as PlatformMultiplexer;
    } else {
        mod unsupported;
        pub use unsupported::UnsupportedMultiplexer as PlatformMultiplexer;
    }
}

use nix::sys::signal::{SigSet, Signal};
use shortener_core::error::{MuxError, MuxResult};

/// Build a signal set from raw signal numbers.
pub(crate) fn sigset_of(signals: &[i32]) -> MuxResult<SigSet> {
    let mut set = SigSet::empty();
    for &signo in signals {
        let sig = Signal::try_from(signo).map_err(|e| MuxError::Setup {
            what: "signal set",
            source: e.into(),
        })?;
        set.add(sig);
    }
    Ok(set)
}

/// Block `signals` in the calling thread. Threads spawned afterwards
/// inherit the mask, so call this on the main thread before starting
/// workers; a signalfd then receives the signals instead.
pub fn block_signals(signals: &[i32]) -> MuxResult<()> {
    sigset_of(signals)?
        .thread_block()
        .map_err(|e| MuxError::Setup { what: "signal mask", source: e.into() })
}
