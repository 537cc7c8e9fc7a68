//! Worker thread: one multiplexer, one connection slab, one request batch.
//!
//! Connections arrive through the worker's inbox; the acceptor pushes the
//! socket and then fires the worker's eventfd. Each connection is then
//! driven through read → parse → route → write on readiness events.

use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use shortener_core::event::{Event, EventKind, Interest, Token, Trigger};
use shortener_core::http::{Method, Request, Response, Status};
use shortener_core::multiplexer::Multiplexer;
use shortener_core::notifier::Notifier;
use shortener_core::router::{route_isolated, HttpError, Router};
use shortener_module::eventfd_notifier::EventFdNotifier;
use shortener_module::header_cache::HeaderReader;
use shortener_module::http1;
use shortener_module::mux::PlatformMultiplexer;
use tracing::{debug, error, info, trace, warn};

use crate::conn::{Conn, ConnSlab, ConnState, ConnectionBudget, ReadStatus};
use crate::ServerError;

/// Requests parsed and routed per pass over a connection's buffer.
pub const BATCH: usize = 32;

const WAKE: Token = Token(0);

fn conn_token(idx: usize) -> Token {
    Token(idx + 1)
}

/// State the acceptor shares with one worker.
pub struct WorkerShared {
    pub inbox: ArrayQueue<TcpStream>,
    pub notifier: EventFdNotifier,
    pub stop: AtomicBool,
}

impl WorkerShared {
    pub fn new(inbox_capacity: usize) -> Result<Self, ServerError> {
        Ok(Self {
            inbox: ArrayQueue::new(inbox_capacity.max(1)),
            notifier: EventFdNotifier::create()?,
            stop: AtomicBool::new(false),
        })
    }
}

/// Acceptor-side handle: hand-off target plus the thread to join.
pub struct WorkerHandle {
    pub id: usize,
    pub shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue `stream` and wake the worker. Gives the stream back when the
    /// inbox is full.
    pub fn hand_off(&self, stream: TcpStream) -> Result<(), TcpStream> {
        self.shared.inbox.push(stream)?;
        if let Err(e) = self.shared.notifier.notify() {
            warn!(worker = self.id, error = %e, "worker wake-up failed");
        }
        Ok(())
    }

    /// Handle with no thread behind it; the inbox is only filled.
    #[cfg(test)]
    pub(crate) fn detached(id: usize, shared: Arc<WorkerShared>) -> Self {
        Self { id, shared, thread: None }
    }

    pub fn stop_and_join(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Err(e) = self.shared.notifier.notify() {
            warn!(worker = self.id, error = %e, "worker stop notification failed");
        }
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

/// Buffer sizes for each connection.
#[derive(Debug, Clone, Copy)]
pub struct BufferLimits {
    pub initial: usize,
    pub max: usize,
}

/// Reusable request/response objects.
struct Batch {
    requests: Vec<Request>,
    responses: Vec<Response>,
}

impl Batch {
    fn new() -> Self {
        Self {
            requests: (0..BATCH).map(|_| Request::default()).collect(),
            responses: (0..BATCH).map(|_| Response::default()).collect(),
        }
    }
}

enum Drive {
    Keep,
    Close,
}

pub struct Worker {
    id: usize,
    mux: PlatformMultiplexer,
    shared: Arc<WorkerShared>,
    conns: ConnSlab,
    budget: Arc<ConnectionBudget>,
    router: Arc<dyn Router>,
    date: HeaderReader,
    limits: BufferLimits,
    batch: Batch,
}

impl Worker {
    pub fn new(
        id: usize,
        shared: Arc<WorkerShared>,
        budget: Arc<ConnectionBudget>,
        router: Arc<dyn Router>,
        date: HeaderReader,
        limits: BufferLimits,
    ) -> Result<Self, ServerError> {
        let mut mux = PlatformMultiplexer::new()?;
        mux.add_wakeup(shared.notifier.fd(), WAKE)?;
        let max_conns = budget.capacity();
        Ok(Self {
            id,
            mux,
            shared,
            conns: ConnSlab::new(max_conns),
            budget,
            router,
            date,
            limits,
            batch: Batch::new(),
        })
    }

    /// Start the worker on its own thread.
    pub fn spawn(self) -> Result<WorkerHandle, ServerError> {
        let id = self.id;
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name(format!("shortener-worker-{}", id))
            .spawn(move || self.run())
            .map_err(|source| ServerError::Spawn { id, source })?;
        Ok(WorkerHandle { id, shared, thread: Some(thread) })
    }

    pub fn run(mut self) {
        info!(worker = self.id, "worker started");
        let mut events = Vec::with_capacity(64);

        loop {
            if let Err(e) = self.mux.wait(&mut events, None) {
                error!(worker = self.id, error = %e, "wait failed, worker exiting");
                break;
            }
            for ev in &events {
                match ev.kind() {
                    EventKind::Wake => self.adopt_pending(),
                    EventKind::Read | EventKind::Write => self.on_io(ev),
                    EventKind::Timer | EventKind::Signal => {}
                }
            }
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
        }

        // Sockets still queued but never adopted hold budget too.
        while self.shared.inbox.pop().is_some() {
            self.budget.release();
        }
        for idx in self.conns.occupied() {
            self.close(idx);
        }
        info!(worker = self.id, "worker stopped");
    }

    fn adopt_pending(&mut self) {
        while let Some(stream) = self.shared.inbox.pop() {
            if let Err(e) = stream.set_nonblocking(true) {
                warn!(worker = self.id, error = %e, "cannot make socket non-blocking");
                self.budget.release();
                continue;
            }
            let _ = stream.set_nodelay(true);
            let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
            let fd = stream.as_raw_fd();

            let idx = match self.conns.alloc(Conn::new(stream, peer, self.id, self.limits.initial)) {
                Ok(idx) => idx,
                Err(conn) => {
                    warn!(worker = self.id, peer = %conn.peer, "connection slab full");
                    drop(conn);
                    self.budget.release();
                    continue;
                }
            };
            if let Err(e) = self.mux.register(fd, Interest::ReadWrite, Trigger::Edge, conn_token(idx)) {
                warn!(worker = self.id, error = %e, "register failed");
                self.close(idx);
                continue;
            }
            trace!(worker = self.id, slot = idx, "connection adopted");

            // Data may have arrived before registration.
            if let Drive::Close = self.drive(idx) {
                self.close(idx);
            }
        }
    }

    fn on_io(&mut self, ev: &Event) {
        let idx = match ev.token().0.checked_sub(1) {
            Some(idx) => idx,
            None => return,
        };
        let conn = match self.conns.get_mut(idx) {
            Some(conn) => conn,
            None => return,
        };

        if ev.error() != 0 {
            let err = std::io::Error::from_raw_os_error(ev.error());
            debug!(worker = self.id, peer = %conn.peer, error = %err, "socket error");
            self.close(idx);
            return;
        }
        // The FIN may share an edge with the last request: `drive` reads
        // until `Eof` and answers whatever is buffered before closing.
        if ev.end_of_file() {
            trace!(worker = self.id, peer = %conn.peer, "peer half-closed");
        }

        let outcome = match ev.kind() {
            EventKind::Write if conn.state == ConnState::AwaitingWrite => self.resume_write(idx),
            EventKind::Write => Drive::Keep,
            _ => self.drive(idx),
        };
        if let Drive::Close = outcome {
            self.close(idx);
        }
    }

    fn resume_write(&mut self, idx: usize) -> Drive {
        let conn = match self.conns.get_mut(idx) {
            Some(conn) => conn,
            None => return Drive::Close,
        };
        match conn.flush() {
            Ok(true) => {
                conn.state = ConnState::AwaitingRead;
                if conn.close_after_write {
                    return Drive::Close;
                }
                // Input that arrived during the write is still buffered.
                self.drive(idx)
            }
            Ok(false) => Drive::Keep,
            Err(e) => {
                debug!(worker = self.id, peer = %conn.peer, error = %e, "write failed");
                Drive::Close
            }
        }
    }

    /// Read whatever is available, answer every complete request, write.
    fn drive(&mut self, idx: usize) -> Drive {
        let max = self.limits.max;
        let worker_id = self.id;
        let conn = match self.conns.get_mut(idx) {
            Some(conn) => conn,
            None => return Drive::Close,
        };

        loop {
            let status = if conn.peer_closed {
                ReadStatus::Eof
            } else {
                match conn.read_available(max) {
                    Ok(status) => status,
                    Err(e) => {
                        debug!(worker = worker_id, peer = %conn.peer, error = %e, "read failed");
                        return Drive::Close;
                    }
                }
            };
            if status == ReadStatus::Eof {
                conn.peer_closed = true;
            }
            if conn.state == ConnState::AwaitingWrite {
                return Drive::Keep;
            }

            let date = self.date.load();
            let progressed = process(conn, &mut self.batch, self.router.as_ref(), &date);
            if status == ReadStatus::Full && !progressed && !conn.close_after_write {
                http1::fill_error(&mut conn.wbuf, Status::PAYLOAD_TOO_LARGE, "request too large", &date, true);
                conn.close_after_write = true;
                conn.discard_input();
                warn!(worker = worker_id, peer = %conn.peer, limit = max, "request exceeds read buffer");
            }

            if !conn.wbuf.is_empty() {
                match conn.flush() {
                    Ok(true) => {}
                    Ok(false) => {
                        conn.state = ConnState::AwaitingWrite;
                        return Drive::Keep;
                    }
                    Err(e) => {
                        debug!(worker = worker_id, peer = %conn.peer, error = %e, "write failed");
                        return Drive::Close;
                    }
                }
            }

            if conn.close_after_write {
                conn.state = ConnState::Closing;
                return Drive::Close;
            }
            if conn.peer_closed {
                return Drive::Close;
            }
            if status != ReadStatus::Full {
                return Drive::Keep;
            }
            // Buffer was full: room was made, the socket may hold more.
        }
    }

    fn close(&mut self, idx: usize) {
        if let Some(conn) = self.conns.free(idx) {
            let _ = self.mux.deregister(conn.stream.as_raw_fd());
            self.budget.release();
            trace!(worker = self.id, slot = idx, peer = %conn.peer, "connection closed");
        }
    }
}

/// Parse, route and serialize every complete request in `conn`'s input.
/// Returns whether any input was consumed.
fn process(conn: &mut Conn, batch: &mut Batch, router: &dyn Router, date: &[u8]) -> bool {
    let mut progressed = false;

    while !conn.close_after_write {
        let (consumed, count) = match http1::parse_requests(conn.input(), &mut batch.requests) {
            Ok((_, 0)) => break,
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(worker = conn.worker_id, peer = %conn.peer, error = %e, "malformed request");
                http1::fill_error(&mut conn.wbuf, e.status(), &e.to_string(), date, true);
                conn.close_after_write = true;
                conn.discard_input();
                return true;
            }
        };

        for i in 0..count {
            let r = &mut batch.requests[i];
            let w = &mut batch.responses[i];
            r.remote_addr = match r.headers.get("X-Forwarded-For") {
                Some(fwd) => fwd.to_string(),
                None => conn.peer.clone(),
            };
            w.reset();

            let start = Instant::now();
            let err = route_isolated(router, w, r).err();
            if let Some(err) = &err {
                render_error(router, w, r, err);
            }
            log_request(r, w, err.as_ref(), start);

            let keep_alive = r.keep_alive();
            if !keep_alive {
                w.headers.set("Connection", "close");
            }
            http1::fill_response(&mut conn.wbuf, w, date, r.method != Method::Head);
            if !keep_alive {
                // Later pipelined requests are dropped with the connection.
                conn.close_after_write = true;
                break;
            }
        }

        conn.consume(consumed);
        progressed = true;
    }

    progressed
}

fn render_error(router: &dyn Router, w: &mut Response, r: &Request, err: &HttpError) {
    if panic::catch_unwind(AssertUnwindSafe(|| router.render_error(w, r, err))).is_err() {
        w.reset();
        w.status = err.status;
        w.headers.set("Content-Type", "text/plain; charset=\"UTF-8\"");
        w.write_str(&err.message);
    }
}

fn log_request(r: &Request, w: &Response, err: Option<&HttpError>, start: Instant) {
    let micros = start.elapsed().as_micros();
    let err = err.map(|e| e.message.as_str()).unwrap_or("");
    if w.status.is_server_error() {
        error!("[{}] {} {} -> {} ({}), {}µs", r.remote_addr, r.method, r.path, w.status.0, err, micros);
    } else if w.status.is_client_error() {
        warn!("[{}] {} {} -> {} ({}), {}µs", r.remote_addr, r.method, r.path, w.status.0, err, micros);
    } else {
        debug!("[{}] {} {} -> {} ({}), {}µs", r.remote_addr, r.method, r.path, w.status.0, err, micros);
    }
}
