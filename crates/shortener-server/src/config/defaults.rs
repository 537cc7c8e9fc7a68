//! Compile-time defaults. Every value can be overridden through the
//! environment (see [`super::ServerConfig::from_env`]).

pub const ADDRESS: &str = "0.0.0.0:7075";

/// `listen(2)` backlog.
pub const BACKLOG: i32 = 128;

/// Connections admitted per worker when `SHORTENER_MAX_CONNS` is unset.
pub const CONNS_PER_WORKER: usize = 512;

pub const READ_BUFFER: usize = 1024;
pub const READ_BUFFER_MAX: usize = 16 * 1024;

/// Header cache refresh period.
pub const TICK_MS: u64 = 1000;

pub const SESSIONS_FILE: &str = "sessions.bin";

pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub const DEBUG: bool = false;

pub const MAX_WORKERS: usize = 256;

/// Half the available parallelism, at least one.
pub fn workers() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    (cpus / 2).clamp(1, MAX_WORKERS)
}
