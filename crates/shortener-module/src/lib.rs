//! # shortener-module: Default implementations
//!
//! One implementation for every seam in `shortener-core`, plus the two
//! pieces of cross-thread state the server shares between its threads.
//!
//! ## Default stack
//!
//! | Trait / concern  | Default Impl       |
//! |------------------|--------------------|
//! | Multiplexer      | EpollMultiplexer   |
//! | Notifier         | EventFdNotifier    |
//! | Listening socket | `listener::bind`   |
//! | Wire codec       | `http1`            |
//! | Date header      | HeaderCache        |
//! | Sessions         | SessionStore       |

pub mod mux;
pub mod eventfd_notifier;
pub mod listener;
pub mod http1;
pub mod header_cache;
pub mod session_store;
