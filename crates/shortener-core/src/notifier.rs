//! Cross-thread wake-up abstraction.
//!
//! A `Notifier` wakes a worker blocked in [`Multiplexer::wait`] after the
//! acceptor has pushed a new connection into its inbox, or at shutdown.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (default): writes 1 to an eventfd registered with the
//!   worker's multiplexer through `add_wakeup`.
//!
//! [`Multiplexer::wait`]: crate::multiplexer::Multiplexer::wait

use std::os::fd::RawFd;

use crate::error::MuxResult;

/// **Contract:**
/// - `notify()` must NEVER block.
/// - Several calls before the consumer wakes coalesce into one wake-up.
pub trait Notifier: Send + Sync {
    fn notify(&self) -> MuxResult<()>;

    /// Descriptor to hand to `Multiplexer::add_wakeup`.
    fn fd(&self) -> RawFd;
}
