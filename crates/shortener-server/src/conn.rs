//! Connection contexts, the per-worker slab that holds them, and the
//! process-wide connection budget used for admission control.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (more of) a request.
    AwaitingRead,
    /// Response bytes pending; resumed on the next Write event.
    AwaitingWrite,
    Closing,
}

/// Outcome of draining the socket into the read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Socket returned `WouldBlock`.
    Drained,
    /// Buffer reached its bound; the socket may hold more.
    Full,
    /// Peer closed its side.
    Eof,
}

pub struct Conn {
    pub stream: TcpStream,
    pub peer: String,
    pub worker_id: usize,
    pub state: ConnState,
    rbuf: Vec<u8>,
    rlen: usize,
    pub wbuf: Vec<u8>,
    woff: usize,
    pub close_after_write: bool,
    pub peer_closed: bool,
}

impl Conn {
    pub fn new(stream: TcpStream, peer: String, worker_id: usize, read_buffer: usize) -> Self {
        Self {
            stream,
            peer,
            worker_id,
            state: ConnState::AwaitingRead,
            rbuf: vec![0; read_buffer.max(1)],
            rlen: 0,
            wbuf: Vec::new(),
            woff: 0,
            close_after_write: false,
            peer_closed: false,
        }
    }

    /// Bytes received and not yet consumed.
    #[inline]
    pub fn input(&self) -> &[u8] {
        &self.rbuf[..self.rlen]
    }

    /// Drop the first `n` input bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.rlen);
        self.rbuf.copy_within(n..self.rlen, 0);
        self.rlen -= n;
    }

    pub fn discard_input(&mut self) {
        self.rlen = 0;
    }

    /// Read until `WouldBlock`, doubling the buffer up to `max` bytes.
    pub fn read_available(&mut self, max: usize) -> io::Result<ReadStatus> {
        loop {
            if self.rlen == self.rbuf.len() {
                if self.rbuf.len() >= max {
                    return Ok(ReadStatus::Full);
                }
                let grown = (self.rbuf.len() * 2).min(max);
                self.rbuf.resize(grown, 0);
            }
            match self.stream.read(&mut self.rbuf[self.rlen..]) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(n) => self.rlen += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Drained),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write pending output until done or `WouldBlock`.
    /// Returns `true` once everything has been sent.
    pub fn flush(&mut self) -> io::Result<bool> {
        while self.woff < self.wbuf.len() {
            match self.stream.write(&self.wbuf[self.woff..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.woff += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.wbuf.clear();
        self.woff = 0;
        Ok(true)
    }
}

/// Fixed-capacity slot table. Slot indices double as multiplexer tokens.
pub struct ConnSlab {
    slots: Vec<Option<Conn>>,
    free: Vec<usize>,
    max: usize,
    live: usize,
}

impl ConnSlab {
    pub fn new(max: usize) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), max, live: 0 }
    }

    /// Store `conn`; gives it back when the slab is full.
    pub fn alloc(&mut self, conn: Conn) -> Result<usize, Conn> {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None if self.slots.len() < self.max => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(conn),
        };
        self.slots[idx] = Some(conn);
        self.live += 1;
        Ok(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Conn> {
        self.slots.get_mut(idx)?.as_mut()
    }

    pub fn free(&mut self, idx: usize) -> Option<Conn> {
        let conn = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.live -= 1;
        Some(conn)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Indices of occupied slots.
    pub fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}

/// Process-wide count of admitted connections.
///
/// The acceptor acquires before handing a socket to a worker; the worker
/// releases when it closes the connection.
#[derive(Debug)]
pub struct ConnectionBudget {
    in_use: AtomicUsize,
    capacity: usize,
}

impl ConnectionBudget {
    pub fn new(capacity: usize) -> Self {
        Self { in_use: AtomicUsize::new(0), capacity }
    }

    pub fn try_acquire(&self) -> bool {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.capacity).then_some(n + 1))
            .is_ok()
    }

    pub fn release(&self) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::Arc;

    fn pair() -> (TcpStream, TcpStream) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let c = TcpStream::connect(l.local_addr().unwrap()).unwrap();
        let (s, _) = l.accept().unwrap();
        s.set_nonblocking(true).unwrap();
        (c, s)
    }

    #[test]
    fn budget_is_bounded() {
        let b = ConnectionBudget::new(2);
        assert!(b.try_acquire());
        assert!(b.try_acquire());
        assert!(!b.try_acquire());
        b.release();
        assert!(b.try_acquire());
        assert_eq!(b.in_use(), 2);
    }

    #[test]
    fn budget_under_contention() {
        let b = Arc::new(ConnectionBudget::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || (0..50).filter(|_| b.try_acquire()).count())
            })
            .collect();
        let won: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(won, 100);
        assert_eq!(b.in_use(), 100);
    }

    #[test]
    fn slab_reuses_slots() {
        let (_c1, s1) = pair();
        let (_c2, s2) = pair();
        let (_c3, s3) = pair();
        let mut slab = ConnSlab::new(2);
        let a = slab.alloc(Conn::new(s1, "a".into(), 0, 16)).ok().unwrap();
        let b = slab.alloc(Conn::new(s2, "b".into(), 0, 16)).ok().unwrap();
        assert_ne!(a, b);
        let rejected = slab.alloc(Conn::new(s3, "c".into(), 0, 16)).err().unwrap();
        assert!(slab.free(a).is_some());
        assert!(slab.free(a).is_none());
        assert_eq!(slab.alloc(rejected).ok(), Some(a));
        assert_eq!(slab.len(), 2);
        assert_eq!(slab.occupied(), vec![0, 1]);
    }

    #[test]
    fn read_buffer_grows_to_bound() {
        let (mut c, s) = pair();
        let mut conn = Conn::new(s, "p".into(), 0, 4);
        c.write_all(&[b'x'; 40]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert_eq!(conn.read_available(16).unwrap(), ReadStatus::Full);
        assert_eq!(conn.input().len(), 16);
        conn.consume(10);
        assert_eq!(conn.input().len(), 6);
        assert_eq!(conn.read_available(16).unwrap(), ReadStatus::Full);
        conn.discard_input();
        assert_eq!(conn.read_available(16).unwrap(), ReadStatus::Drained);
        assert_eq!(conn.input().len(), 14);

        drop(c);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(conn.read_available(16).unwrap(), ReadStatus::Eof);
    }

    #[test]
    fn flush_sends_everything() {
        let (mut c, s) = pair();
        let mut conn = Conn::new(s, "p".into(), 0, 4);
        conn.wbuf.extend_from_slice(b"hello");
        assert!(conn.flush().unwrap());
        assert!(conn.wbuf.is_empty());
        let mut got = [0u8; 5];
        c.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hello");
    }
}
