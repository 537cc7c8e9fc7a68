//! Server configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (the binary maps its command-line flags onto these)
//! 2. Environment variables
//! 3. Library defaults ([`defaults`])
//!
//! # Example
//!
//! ```rust,ignore
//! use shortener_server::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .num_workers(4)
//!     .max_conns(1024);
//! config.validate()?;
//! ```

pub mod defaults;

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use shortener_core::env::{env_duration_ms, env_flag, env_get, env_get_opt, env_string};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub address: String,
    /// `listen(2)` backlog
    pub backlog: i32,
    /// Worker threads
    pub num_workers: usize,
    /// Connections admitted at once across all workers
    pub max_conns: usize,
    /// Initial per-connection read buffer
    pub read_buffer: usize,
    /// Largest a read buffer may grow; bounds request size
    pub read_buffer_max: usize,
    /// Header cache refresh period
    pub tick: Duration,
    /// Session snapshot file
    pub sessions_file: PathBuf,
    /// Sliding session lifetime
    pub session_ttl_secs: i64,
    /// Verbose logging
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SHORTENER_ADDRESS` - Listen address
    /// - `SHORTENER_BACKLOG` - Listen backlog
    /// - `SHORTENER_WORKERS` - Worker threads
    /// - `SHORTENER_MAX_CONNS` - Connection budget (default 512 per worker)
    /// - `SHORTENER_READ_BUFFER` - Initial read buffer bytes
    /// - `SHORTENER_READ_BUFFER_MAX` - Read buffer bound in bytes
    /// - `SHORTENER_TICK_MS` - Header cache tick in milliseconds
    /// - `SHORTENER_SESSIONS_FILE` - Session snapshot path
    /// - `SHORTENER_SESSION_TTL_SECS` - Session lifetime in seconds
    /// - `SHORTENER_DEBUG` - Verbose logging (0/1)
    pub fn from_env() -> Self {
        let num_workers = env_get("SHORTENER_WORKERS", defaults::workers());
        Self {
            address: env_string("SHORTENER_ADDRESS", defaults::ADDRESS),
            backlog: env_get("SHORTENER_BACKLOG", defaults::BACKLOG),
            num_workers,
            max_conns: env_get_opt("SHORTENER_MAX_CONNS")
                .unwrap_or(defaults::CONNS_PER_WORKER * num_workers.max(1)),
            read_buffer: env_get("SHORTENER_READ_BUFFER", defaults::READ_BUFFER),
            read_buffer_max: env_get("SHORTENER_READ_BUFFER_MAX", defaults::READ_BUFFER_MAX),
            tick: env_duration_ms("SHORTENER_TICK_MS", defaults::TICK_MS),
            sessions_file: PathBuf::from(env_string("SHORTENER_SESSIONS_FILE", defaults::SESSIONS_FILE)),
            session_ttl_secs: env_get("SHORTENER_SESSION_TTL_SECS", defaults::SESSION_TTL_SECS),
            debug: env_flag("SHORTENER_DEBUG", defaults::DEBUG),
        }
    }

    /// Library defaults only, no environment lookups.
    pub fn new() -> Self {
        let num_workers = defaults::workers();
        Self {
            address: defaults::ADDRESS.to_string(),
            backlog: defaults::BACKLOG,
            num_workers,
            max_conns: defaults::CONNS_PER_WORKER * num_workers,
            read_buffer: defaults::READ_BUFFER,
            read_buffer_max: defaults::READ_BUFFER_MAX,
            tick: Duration::from_millis(defaults::TICK_MS),
            sessions_file: PathBuf::from(defaults::SESSIONS_FILE),
            session_ttl_secs: defaults::SESSION_TTL_SECS,
            debug: defaults::DEBUG,
        }
    }

    // Builder methods

    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.address = addr.into();
        self
    }

    pub fn backlog(mut self, n: i32) -> Self {
        self.backlog = n;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_conns(mut self, n: usize) -> Self {
        self.max_conns = n;
        self
    }

    pub fn read_buffer(mut self, initial: usize, max: usize) -> Self {
        self.read_buffer = initial;
        self.read_buffer_max = max;
        self
    }

    pub fn tick(mut self, d: Duration) -> Self {
        self.tick = d;
        self
    }

    pub fn sessions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sessions_file = path.into();
        self
    }

    pub fn session_ttl_secs(mut self, secs: i64) -> Self {
        self.session_ttl_secs = secs;
        self
    }

    pub fn debug(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|source| ConfigError::Address { value: self.address.clone(), source })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > defaults::MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers must be <= 256"));
        }
        if self.max_conns == 0 {
            return Err(ConfigError::InvalidValue("max_conns must be > 0"));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::InvalidValue("backlog must be > 0"));
        }
        if self.read_buffer == 0 || self.read_buffer > self.read_buffer_max {
            return Err(ConfigError::InvalidValue("read_buffer must be in 1..=read_buffer_max"));
        }
        if self.tick.is_zero() {
            return Err(ConfigError::InvalidValue("tick must be > 0"));
        }
        if self.session_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue("session_ttl_secs must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
    #[error("invalid listen address {value:?}: {source}")]
    Address { value: String, source: AddrParseError },
}
