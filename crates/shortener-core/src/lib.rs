//! # shortener-core: Trait definitions for the Shortener server
//!
//! This crate defines the seams of the server. Each trait models one
//! capability the event loop depends on; concrete implementations live in
//! `shortener-module` and are picked at startup.
//!
//! | Trait         | Default Impl (shortener-module) |
//! |---------------|---------------------------------|
//! | Multiplexer   | EpollMultiplexer                |
//! | Notifier      | EventFdNotifier                 |
//! | Clock         | SystemClock (this crate)        |
//! | Router        | application layer (cmd/)        |
//!
//! Worker and Acceptor code in `shortener-server` depends on these traits
//! and on the plain HTTP types in [`http`], never on the OS facility.

pub mod event;
pub mod multiplexer;
pub mod notifier;
pub mod clock;
pub mod http;
pub mod router;
pub mod error;
pub mod env;
pub mod log;
