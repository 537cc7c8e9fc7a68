//! # shortener-server: Event loop and lifecycle
//!
//! ```text
//!                 ┌──────────────┐  inbox + eventfd  ┌──────────┐
//!   listener ───▶ │   Acceptor   │ ────────────────▶ │ Worker 0 │
//!                 │ budget, tick │ ────────────────▶ │ Worker 1 │
//!   signals  ───▶ │  (main thr)  │        ...        │   ...    │
//!                 └──────────────┘                   └──────────┘
//! ```
//!
//! [`Server::bind`] validates the configuration and opens the listener.
//! [`Server::run`] blocks SIGINT/SIGTERM, starts the workers and runs the
//! acceptor on the calling thread. When a signal (or a
//! [`ShutdownHandle`]) stops it, the workers are joined and the session
//! store is written to its file.

pub mod acceptor;
pub mod config;
pub mod conn;
pub mod worker;

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use shortener_core::clock::{Clock, SystemClock};
use shortener_core::error::MuxError;
use shortener_core::notifier::Notifier;
use shortener_core::router::Router;
use shortener_module::eventfd_notifier::EventFdNotifier;
use shortener_module::header_cache::HeaderCache;
use shortener_module::listener;
use shortener_module::mux::block_signals;
use shortener_module::session_store::SessionStore;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::acceptor::{Acceptor, SHUTDOWN_SIGNALS};
use crate::config::{ConfigError, ServerConfig};
use crate::conn::ConnectionBudget;
use crate::worker::{BufferLimits, Worker, WorkerShared};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error("cannot start worker {id}: {source}")]
    Spawn { id: usize, source: io::Error },
    #[error("header cache has no free reader slot")]
    ReaderSlots,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    notifier: Arc<EventFdNotifier>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if let Err(e) = self.notifier.notify() {
            warn!(error = %e, "shutdown notification failed");
        }
    }
}

pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    router: Arc<dyn Router>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<EventFdNotifier>,
}

impl Server {
    pub fn bind(
        config: ServerConfig,
        router: Arc<dyn Router>,
        sessions: Arc<SessionStore>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.socket_addr()?;
        let listener = listener::bind(addr, config.backlog).map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            config,
            listener,
            router,
            sessions,
            clock: Arc::new(SystemClock),
            shutdown: Arc::new(EventFdNotifier::create()?),
        })
    }

    /// Replace the wall clock used for the `Date` header.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { notifier: Arc::clone(&self.shutdown) }
    }

    /// Serve until SIGINT/SIGTERM or [`ShutdownHandle::shutdown`], then
    /// join the workers and persist the sessions.
    pub fn run(self) -> Result<(), ServerError> {
        // Before any thread is spawned, so every thread inherits the mask.
        block_signals(&SHUTDOWN_SIGNALS)?;

        let Server { config, listener, router, sessions, clock, shutdown } = self;
        let n = config.num_workers;
        let header = Arc::new(HeaderCache::new(n + 1, clock.now_unix()));
        let budget = Arc::new(ConnectionBudget::new(config.max_conns));
        let limits = BufferLimits { initial: config.read_buffer, max: config.read_buffer_max };

        let mut acceptor =
            Acceptor::new(listener, Arc::clone(&budget), Arc::clone(&header), clock, config.tick, &shutdown)?;
        for id in 0..n {
            let spawned = WorkerShared::new(config.max_conns).and_then(|shared| {
                let date = header.reader().ok_or(ServerError::ReaderSlots)?;
                Worker::new(id, Arc::new(shared), Arc::clone(&budget), Arc::clone(&router), date, limits)?.spawn()
            });
            match spawned {
                Ok(handle) => acceptor.add_worker(handle),
                Err(e) => {
                    acceptor.stop_workers();
                    return Err(e);
                }
            }
        }

        info!(address = %config.address, workers = n, max_conns = config.max_conns, "listening");
        let result = acceptor.run();
        acceptor.stop_workers();

        match sessions.snapshot_to_file(&config.sessions_file) {
            Ok(count) => info!(count, "sessions persisted"),
            Err(e) => error!(error = %e, path = %config.sessions_file.display(), "session snapshot failed"),
        }
        info!("server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortener_core::http::{Request, Response};
    use shortener_core::router::{HttpError, RouteResult};
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// Far larger than a loopback socket's send buffer.
    const BIG_BODY: usize = 4 << 20;

    struct TestRouter;

    impl Router for TestRouter {
        fn route(&self, w: &mut Response, r: &Request) -> RouteResult {
            match r.path.as_str() {
                "/hello" => {
                    w.write_str("hello");
                    Ok(())
                }
                "/echo" => {
                    w.body.extend_from_slice(&r.body);
                    Ok(())
                }
                "/whoami" => {
                    w.write_str(&r.remote_addr);
                    Ok(())
                }
                "/big" => {
                    w.body.resize(BIG_BODY, b'x');
                    Ok(())
                }
                "/panic" => panic!("handler blew up"),
                _ => Err(HttpError::not_found("no such page")),
            }
        }
    }

    struct Running {
        addr: SocketAddr,
        handle: ShutdownHandle,
        thread: Option<JoinHandle<Result<(), ServerError>>>,
        sessions: Arc<SessionStore>,
        _dir: tempfile::TempDir,
    }

    impl Running {
        fn stop(mut self) -> Result<(), ServerError> {
            self.handle.shutdown();
            self.thread.take().unwrap().join().unwrap()
        }
    }

    fn start(tune: impl FnOnce(ServerConfig) -> ServerConfig) -> Running {
        start_with_clock(tune, Arc::new(SystemClock))
    }

    fn start_with_clock(tune: impl FnOnce(ServerConfig) -> ServerConfig, clock: Arc<dyn Clock>) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let config = tune(
            ServerConfig::new()
                .address("127.0.0.1:0")
                .num_workers(2)
                .max_conns(64)
                .tick(Duration::from_millis(100))
                .sessions_file(dir.path().join("sessions.bin")),
        );
        let sessions = Arc::new(SessionStore::new(3600, Arc::new(SystemClock)));
        let server = Server::bind(config, Arc::new(TestRouter), Arc::clone(&sessions)).unwrap().with_clock(clock);
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let thread = thread::spawn(move || server.run());
        Running { addr, handle, thread: Some(thread), sessions, _dir: dir }
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let s = TcpStream::connect(addr).unwrap();
        s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        s
    }

    struct Reply {
        status: u16,
        head: String,
        body: Vec<u8>,
    }

    /// Read exactly one response, using Content-Length to find its end.
    fn read_reply(s: &mut TcpStream, pending: &mut Vec<u8>) -> Reply {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&pending[..end]).to_string();
                let len: usize = head
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map(|v| v.trim().parse().unwrap())
                    .unwrap_or(0);
                let total = end + 4 + len;
                if pending.len() >= total {
                    let body = pending[end + 4..total].to_vec();
                    pending.drain(..total);
                    let status = head[9..12].parse().unwrap();
                    return Reply { status, head, body };
                }
            }
            let n = s.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before a full response");
            pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn at_eof(s: &mut TcpStream) -> bool {
        let mut b = [0u8; 1];
        matches!(s.read(&mut b), Ok(0))
    }

    #[test]
    fn pipelined_requests_answered_in_order() {
        let srv = start(|c| c);
        let mut s = connect(srv.addr);
        s.write_all(
            b"GET /hello HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\nPOST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc",
        )
        .unwrap();

        let mut pending = Vec::new();
        let a = read_reply(&mut s, &mut pending);
        let b = read_reply(&mut s, &mut pending);
        let c = read_reply(&mut s, &mut pending);
        assert_eq!((a.status, a.body.as_slice()), (200, &b"hello"[..]));
        assert_eq!(b.status, 404);
        assert_eq!(b.body, b"no such page\n");
        assert_eq!((c.status, c.body.as_slice()), (200, &b"abc"[..]));
        assert!(a.head.contains("\r\nDate: "));
        srv.stop().unwrap();
    }

    #[test]
    fn large_responses_resume_after_partial_write() {
        let srv = start(|c| c);
        let mut s = connect(srv.addr);
        s.write_all(b"GET /big HTTP/1.1\r\n\r\nGET /big HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\n\r\n")
            .unwrap();

        // The worker is now parked on a full send buffer; this arrives mid-write.
        thread::sleep(Duration::from_millis(100));
        s.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        thread::sleep(Duration::from_millis(100));

        let mut pending = Vec::new();
        let a = read_reply(&mut s, &mut pending);
        let b = read_reply(&mut s, &mut pending);
        let c = read_reply(&mut s, &mut pending);
        let d = read_reply(&mut s, &mut pending);
        assert_eq!([a.status, b.status, c.status, d.status], [200; 4]);
        assert_eq!((a.body.len(), b.body.len()), (BIG_BODY, BIG_BODY));
        assert!(a.body.iter().all(|&x| x == b'x'));
        assert_eq!((c.body.as_slice(), d.body.as_slice()), (&b"hello"[..], &b"hello"[..]));

        s.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).status, 200);
        srv.stop().unwrap();
    }

    #[test]
    fn request_sent_with_fin_is_answered() {
        let srv = start(|c| c);
        for _ in 0..20 {
            let mut s = connect(srv.addr);
            thread::sleep(Duration::from_millis(20));
            s.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
            s.shutdown(std::net::Shutdown::Write).unwrap();

            let mut reply = Vec::new();
            s.read_to_end(&mut reply).unwrap();
            assert!(reply.starts_with(b"HTTP/1.1 200 OK\r\n"), "{:?}", String::from_utf8_lossy(&reply));
            assert!(reply.ends_with(b"\r\n\r\nhello"));
        }
        srv.stop().unwrap();
    }

    #[test]
    fn panic_is_isolated_to_its_request() {
        let srv = start(|c| c);
        let mut s = connect(srv.addr);
        let mut pending = Vec::new();

        s.write_all(b"GET /panic HTTP/1.1\r\n\r\n").unwrap();
        let r = read_reply(&mut s, &mut pending);
        assert_eq!(r.status, 500);
        assert!(String::from_utf8_lossy(&r.body).contains("handler blew up"));

        s.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).status, 200);
        srv.stop().unwrap();
    }

    #[test]
    fn forwarded_for_replaces_peer() {
        let srv = start(|c| c);
        let mut s = connect(srv.addr);
        let mut pending = Vec::new();
        s.write_all(b"GET /whoami HTTP/1.1\r\nX-Forwarded-For: 203.0.113.9\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).body, b"203.0.113.9");
        s.write_all(b"GET /whoami HTTP/1.1\r\n\r\n").unwrap();
        assert!(read_reply(&mut s, &mut pending).body.starts_with(b"127.0.0.1:"));
        srv.stop().unwrap();
    }

    #[test]
    fn admission_control_rejects_beyond_budget() {
        let srv = start(|c| c.max_conns(2));
        let mut pending = Vec::new();

        // Prove both are admitted before opening the third.
        let mut first = connect(srv.addr);
        first.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut first, &mut pending).status, 200);
        let mut second = connect(srv.addr);
        second.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut second, &mut pending).status, 200);

        let mut third = connect(srv.addr);
        let r = read_reply(&mut third, &mut pending);
        assert_eq!(r.status, 503);
        assert_eq!(r.body, b"too many clients\n");
        assert!(at_eof(&mut third));

        first.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut first, &mut pending).status, 200);
        second.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut second, &mut pending).status, 200);
        srv.stop().unwrap();
    }

    #[test]
    fn closed_connections_return_budget() {
        let srv = start(|c| c.max_conns(1));
        let mut pending = Vec::new();
        for _ in 0..3 {
            let mut s = connect(srv.addr);
            s.write_all(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
            let r = read_reply(&mut s, &mut pending);
            assert_eq!(r.status, 200);
            assert!(r.head.contains("Connection: close"));
            assert!(at_eof(&mut s));
            // Give the worker a moment to release the slot.
            thread::sleep(Duration::from_millis(50));
        }
        srv.stop().unwrap();
    }

    #[test]
    fn oversized_request_gets_413() {
        let srv = start(|c| c.read_buffer(64, 256));
        let mut s = connect(srv.addr);
        let mut req = b"GET /hello HTTP/1.1\r\nX-Filler: ".to_vec();
        req.resize(256, b'a');
        s.write_all(&req).unwrap();

        let mut pending = Vec::new();
        let r = read_reply(&mut s, &mut pending);
        assert_eq!(r.status, 413);
        assert!(r.head.contains("Connection: close"));
        assert!(at_eof(&mut s));
        srv.stop().unwrap();
    }

    #[test]
    fn malformed_request_gets_400_and_close() {
        let srv = start(|c| c);
        let mut s = connect(srv.addr);
        s.write_all(b"NONSENSE\r\n\r\n").unwrap();
        let mut pending = Vec::new();
        assert_eq!(read_reply(&mut s, &mut pending).status, 400);
        assert!(at_eof(&mut s));
        srv.stop().unwrap();
    }

    #[test]
    fn http10_closes_unless_keep_alive() {
        let srv = start(|c| c);
        let mut pending = Vec::new();

        let mut s = connect(srv.addr);
        s.write_all(b"GET /hello HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).status, 200);
        assert!(at_eof(&mut s));

        let mut s = connect(srv.addr);
        s.write_all(b"GET /hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).status, 200);
        s.write_all(b"GET /hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert_eq!(read_reply(&mut s, &mut pending).status, 200);
        srv.stop().unwrap();
    }

    #[test]
    fn shutdown_persists_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kept.bin");
        let srv = start(|c| c.sessions_file(&file));
        let token = srv.sessions.create(42).unwrap().token;
        srv.stop().unwrap();

        let restored = SessionStore::new(3600, Arc::new(SystemClock));
        assert_eq!(restored.restore_from_file(&file).unwrap(), 1);
        assert_eq!(restored.lookup(&token).unwrap().subject, 42);
    }

    #[test]
    fn date_header_comes_from_server_clock() {
        let clock = Arc::new(shortener_core::clock::ManualClock::new(784111777));
        // Long tick: the initial value must be served as is.
        let srv = start_with_clock(|c| c.tick(Duration::from_secs(3600)), clock);
        let mut s = connect(srv.addr);
        s.write_all(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        let r = read_reply(&mut s, &mut Vec::new());
        assert!(r.head.contains("\r\nDate: Sun, 06 Nov 1994 08:49:37 GMT\r\n"));
        srv.stop().unwrap();
    }

    #[test]
    fn invalid_config_is_rejected_at_bind() {
        let sessions = Arc::new(SessionStore::new(3600, Arc::new(SystemClock)));
        let err = Server::bind(ServerConfig::new().num_workers(0), Arc::new(TestRouter), sessions);
        assert!(matches!(err, Err(ServerError::Config(_))));
    }
}
