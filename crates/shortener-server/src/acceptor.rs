//! Acceptor: owns the listening socket, admits connections against the
//! budget and deals them to workers in turn. Its multiplexer also carries
//! the header cache tick and the shutdown signals.

use std::io::{self, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use shortener_core::clock::Clock;
use shortener_core::event::{EventKind, Interest, Token, Trigger};
use shortener_core::http::Status;
use shortener_core::multiplexer::Multiplexer;
use shortener_core::notifier::Notifier;
use shortener_module::eventfd_notifier::EventFdNotifier;
use shortener_module::header_cache::{HeaderCache, HeaderReader};
use shortener_module::http1;
use shortener_module::mux::PlatformMultiplexer;
use tracing::{debug, error, info, warn};

use crate::conn::ConnectionBudget;
use crate::worker::WorkerHandle;
use crate::ServerError;

const LISTENER: Token = Token(0);
const TICK: Token = Token(1);
const SIGNALS: Token = Token(2);
const SHUTDOWN: Token = Token(3);

pub const SHUTDOWN_SIGNALS: [i32; 2] = [libc::SIGINT, libc::SIGTERM];

/// Turn counter over `n` workers. The turn moves on only when a
/// connection was actually handed off.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: usize,
}

impl RoundRobin {
    pub fn current(&self, n: usize) -> usize {
        self.counter % n.max(1)
    }

    pub fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }
}

pub struct Acceptor {
    listener: TcpListener,
    mux: PlatformMultiplexer,
    workers: Vec<WorkerHandle>,
    rr: RoundRobin,
    budget: Arc<ConnectionBudget>,
    header: Arc<HeaderCache>,
    date: HeaderReader,
    clock: Arc<dyn Clock>,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        budget: Arc<ConnectionBudget>,
        header: Arc<HeaderCache>,
        clock: Arc<dyn Clock>,
        tick: Duration,
        shutdown: &EventFdNotifier,
    ) -> Result<Self, ServerError> {
        let date = header.reader().ok_or(ServerError::ReaderSlots)?;
        let mut mux = PlatformMultiplexer::new()?;
        mux.register(listener.as_raw_fd(), Interest::AcceptReadable, Trigger::Edge, LISTENER)?;
        mux.add_timer(tick, TICK)?;
        mux.add_signals(&SHUTDOWN_SIGNALS, SIGNALS)?;
        mux.add_wakeup(shutdown.fd(), SHUTDOWN)?;
        Ok(Self { listener, mux, workers: Vec::new(), rr: RoundRobin::default(), budget, header, date, clock })
    }

    pub fn add_worker(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    /// Serve until a shutdown signal or notification arrives.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Vec::with_capacity(16);
        loop {
            self.mux.wait(&mut events, None)?;
            for ev in &events {
                match (ev.kind(), ev.token()) {
                    (EventKind::Read, LISTENER) => self.accept_ready(),
                    (EventKind::Timer, TICK) => self.header.publish(self.clock.now_unix()),
                    (EventKind::Signal, SIGNALS) => {
                        info!(signal = ev.signo(), "shutdown signal received");
                        return Ok(());
                    }
                    (EventKind::Wake, SHUTDOWN) => {
                        info!("shutdown requested");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }

    /// Stop every worker and wait for it to exit.
    pub fn stop_workers(&mut self) {
        for w in &mut self.workers {
            w.stop_and_join();
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted");
                    self.dispatch(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }

    fn dispatch(&mut self, stream: TcpStream) {
        if self.workers.is_empty() || !self.budget.try_acquire() {
            warn!(capacity = self.budget.capacity(), "too many clients, rejecting connection");
            self.reject(stream);
            return;
        }
        let i = self.rr.current(self.workers.len());
        match self.workers[i].hand_off(stream) {
            Ok(()) => self.rr.advance(),
            Err(stream) => {
                warn!(worker = i, "worker inbox full, rejecting connection");
                self.budget.release();
                self.reject(stream);
            }
        }
    }

    /// Answer 503 directly and close.
    fn reject(&mut self, mut stream: TcpStream) {
        let date = self.date.load();
        let mut buf = Vec::with_capacity(256);
        http1::fill_error(&mut buf, Status::SERVICE_UNAVAILABLE, "too many clients", &date, true);
        // A fresh socket's send buffer takes this in one write.
        if let Err(e) = stream.set_nonblocking(true).and_then(|_| stream.write_all(&buf)) {
            debug!(error = %e, "rejection response not delivered");
        }
        let _ = stream.shutdown(Shutdown::Write);
    }
}
