//! Shortener server
//!
//! Event-driven URL shortener with user accounts. One acceptor thread
//! hands connections to epoll workers; sessions survive restarts through
//! the sessions file.
//!
//! Usage:
//!     ./target/release/shortener [--address 0.0.0.0:7075] [--workers 4] [--debug]
//!
//! Every flag falls back to its `SHORTENER_*` environment variable.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use shortener_core::clock::{Clock, SystemClock};
use shortener_core::log;
use shortener_module::session_store::{SessionError, SessionStore};
use shortener_server::config::ServerConfig;
use shortener_server::Server;
use tracing::{error, info, warn};

use crate::app::l10n::Language;
use crate::app::App;

#[derive(Debug, Parser)]
#[command(name = "shortener", version, about = "Event-driven URL shortener server")]
struct Opts {
    /// Address to listen on, e.g. 0.0.0.0:7075.
    #[arg(long)]
    address: Option<String>,

    /// Number of worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Maximum number of simultaneously open connections.
    #[arg(long)]
    max_conns: Option<usize>,

    /// File the sessions are restored from and saved to.
    #[arg(long)]
    sessions_file: Option<PathBuf>,

    /// Debug logging, non-secure cookies and detailed error pages.
    #[arg(long)]
    debug: bool,

    /// Interface language: en, ru or fr.
    #[arg(long, env = "SHORTENER_LANG", default_value = "en")]
    lang: Language,
}

impl Opts {
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(addr) = &self.address {
            config = config.address(addr.clone());
        }
        if let Some(n) = self.workers {
            config = config.num_workers(n);
        }
        if let Some(n) = self.max_conns {
            config = config.max_conns(n);
        }
        if let Some(path) = &self.sessions_file {
            config = config.sessions_file(path.clone());
        }
        if self.debug {
            config = config.debug(true);
        }
        config
    }
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    let config = opts.apply(ServerConfig::from_env());
    log::init(config.debug);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SessionStore::new(config.session_ttl_secs, Arc::clone(&clock)));
    match sessions.restore_from_file(&config.sessions_file) {
        Ok(n) => info!(count = n, file = %config.sessions_file.display(), "sessions restored"),
        Err(SessionError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(file = %config.sessions_file.display(), "no sessions file, starting empty");
        }
        Err(e) => warn!(error = %e, file = %config.sessions_file.display(), "cannot restore sessions"),
    }

    let app = Arc::new(App::new(Arc::clone(&sessions), clock, opts.lang, config.debug));
    info!(
        address = %config.address,
        workers = config.num_workers,
        max_conns = config.max_conns,
        lang = %opts.lang,
        "starting shortener"
    );

    let server = match Server::bind(config, app, sessions) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    match server.run() {
        Ok(()) => {
            info!("shortener stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
