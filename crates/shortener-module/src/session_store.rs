//! Session store: token → subject with sliding expiry.
//!
//! The map lock covers structural changes (insert, delete, snapshot); each
//! record has its own mutex so concurrent lookups of different sessions only
//! share the map's read lock.
//!
//! Persisted as a bincode-encoded list of `(token, subject, expiry)`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use shortener_core::clock::Clock;
use thiserror::Error;
use tracing::{debug, info};

/// Raw token length before encoding.
pub const TOKEN_BYTES: usize = 64;

/// One week.
pub const DEFAULT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("entropy source failed: {0}")]
    Entropy(getrandom::Error),
    #[error("session file i/o: {0}")]
    Io(#[from] io::Error),
    #[error("session file encoding: {0}")]
    Codec(#[from] bincode::Error),
}

/// A copy of a live session handed out by `create`/`lookup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub subject: u64,
    pub expiry: i64,
}

#[derive(Debug)]
struct SessionRecord {
    subject: u64,
    expiry: i64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    token: String,
    subject: u64,
    expiry: i64,
}

type Record = Arc<Mutex<SessionRecord>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Record>>,
    ttl: i64,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(ttl_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl: ttl_secs, clock }
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a session for `subject`. Expires `ttl` seconds from now.
    pub fn create(&self, subject: u64) -> Result<Session, SessionError> {
        let expiry = self.clock.now_unix() + self.ttl;
        let mut map = self.write();
        let token = loop {
            let token = new_token()?;
            if !map.contains_key(&token) {
                break token;
            }
        };
        map.insert(token.clone(), Arc::new(Mutex::new(SessionRecord { subject, expiry })));
        Ok(Session { token, subject, expiry })
    }

    /// Find the session for `token` and slide its expiry forward.
    ///
    /// An expired session is removed and reported as `Expired`; every later
    /// lookup of the same token returns `NotFound`.
    pub fn lookup(&self, token: &str) -> Result<Session, SessionError> {
        let record = self.read().get(token).cloned().ok_or(SessionError::NotFound)?;

        let now = self.clock.now_unix();
        {
            let mut rec = lock(&record);
            if now < rec.expiry {
                rec.expiry = now + self.ttl;
                return Ok(Session { token: token.to_string(), subject: rec.subject, expiry: rec.expiry });
            }
        }

        // Record lock released before the map lock: snapshot takes them in
        // the opposite order.
        let mut map = self.write();
        if map.get(token).is_some_and(|cur| Arc::ptr_eq(cur, &record)) {
            map.remove(token);
            debug!("session expired, removed");
        }
        Err(SessionError::Expired)
    }

    /// Remove `token`. Unknown tokens are ignored.
    pub fn delete(&self, token: &str) {
        self.write().remove(token);
    }

    /// Write every session to `path` via a sibling temp file and rename.
    pub fn snapshot_to_file(&self, path: &Path) -> Result<usize, SessionError> {
        let entries: Vec<SnapshotEntry> = self
            .read()
            .iter()
            .map(|(token, record)| {
                let rec = lock(record);
                SnapshotEntry { token: token.clone(), subject: rec.subject, expiry: rec.expiry }
            })
            .collect();

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);

        let file = File::create(tmp)?;
        let mut w = BufWriter::new(file);
        bincode::serialize_into(&mut w, &entries)?;
        w.flush()?;
        w.get_ref().sync_all()?;
        drop(w);
        fs::rename(tmp, path)?;

        info!(count = entries.len(), path = %path.display(), "sessions saved");
        Ok(entries.len())
    }

    /// Load sessions from `path`, replacing any with the same token.
    /// Sessions already expired are dropped. Returns how many were kept.
    pub fn restore_from_file(&self, path: &Path) -> Result<usize, SessionError> {
        let file = File::open(path)?;
        let entries: Vec<SnapshotEntry> = bincode::deserialize_from(BufReader::new(file))?;
        let total = entries.len();

        let now = self.clock.now_unix();
        let mut map = self.write();
        let mut kept = 0;
        for e in entries.into_iter().filter(|e| now < e.expiry) {
            map.insert(e.token, Arc::new(Mutex::new(SessionRecord { subject: e.subject, expiry: e.expiry })));
            kept += 1;
        }

        info!(kept, dropped = total - kept, path = %path.display(), "sessions restored");
        Ok(kept)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Record>> {
        self.sessions.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Record>> {
        self.sessions.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn lock(record: &Record) -> MutexGuard<'_, SessionRecord> {
    record.lock().unwrap_or_else(|p| p.into_inner())
}

fn new_token() -> Result<String, SessionError> {
    let mut raw = [0u8; TOKEN_BYTES];
    getrandom::getrandom(&mut raw).map_err(SessionError::Entropy)?;
    Ok(URL_SAFE_NO_PAD.encode(raw))
}
