//! Shared `Date` header value, republished once per tick.
//!
//! One writer (the acceptor's timer) swaps in a freshly formatted buffer;
//! worker threads copy the current buffer out without taking a lock.
//!
//! Reclamation is epoch based. A reader stores the global epoch in its own
//! slot before loading the pointer and clears the slot afterwards. The
//! writer tags each replaced buffer with the epoch current at the swap and
//! frees it once every slot is either idle (0) or newer than that tag.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use shortener_core::http::{put_http_date, HTTP_DATE_LEN};

pub type DateBytes = [u8; HTTP_DATE_LEN];

struct ReaderSlot {
    claimed: AtomicBool,
    epoch: AtomicU64,
}

struct Retired {
    epoch: u64,
    ptr: *mut DateBytes,
}

// The pointer is owned by the retired list and only freed under its lock.
unsafe impl Send for Retired {}

pub struct HeaderCache {
    current: AtomicPtr<DateBytes>,
    epoch: AtomicU64,
    slots: Box<[ReaderSlot]>,
    retired: Mutex<Vec<Retired>>,
}

impl HeaderCache {
    /// Cache holding the date for `now_unix`, with room for `max_readers`
    /// concurrently registered readers.
    pub fn new(max_readers: usize, now_unix: i64) -> Self {
        let slots = (0..max_readers)
            .map(|_| ReaderSlot { claimed: AtomicBool::new(false), epoch: AtomicU64::new(0) })
            .collect();
        Self {
            current: AtomicPtr::new(Box::into_raw(Box::new(format_date(now_unix)))),
            epoch: AtomicU64::new(1),
            slots,
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Claim a reader slot. `None` when every slot is taken.
    pub fn reader(self: &Arc<Self>) -> Option<HeaderReader> {
        let slot = self.slots.iter().position(|s| {
            s.claimed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
        })?;
        Some(HeaderReader { cache: Arc::clone(self), slot })
    }

    /// Format `now_unix` and make it the current value, then free any
    /// retired buffers no reader can still see.
    pub fn publish(&self, now_unix: i64) {
        let fresh = Box::into_raw(Box::new(format_date(now_unix)));

        // The retired lock also serializes concurrent publishers.
        let mut retired = match self.retired.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let old = self.current.swap(fresh, Ordering::SeqCst);
        let tag = self.epoch.fetch_add(1, Ordering::SeqCst);
        retired.push(Retired { epoch: tag, ptr: old });

        let oldest_active = self
            .slots
            .iter()
            .map(|s| s.epoch.load(Ordering::SeqCst))
            .filter(|&e| e != 0)
            .min();

        retired.retain(|r| {
            let in_use = matches!(oldest_active, Some(e) if e <= r.epoch);
            if !in_use {
                // No reader slot can reference this buffer any more.
                drop(unsafe { Box::from_raw(r.ptr) });
            }
            in_use
        });
    }

    fn load_into(&self, slot: usize, out: &mut DateBytes) {
        let s = &self.slots[slot];
        let e = self.epoch.load(Ordering::SeqCst);
        s.epoch.store(e, Ordering::SeqCst);
        let p = self.current.load(Ordering::SeqCst);
        // `p` stays allocated while this slot holds an epoch not newer than its retirement.
        *out = unsafe { *p };
        s.epoch.store(0, Ordering::Release);
    }

    #[cfg(test)]
    fn retired_len(&self) -> usize {
        self.retired.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Drop for HeaderCache {
    fn drop(&mut self) {
        let cur = *self.current.get_mut();
        drop(unsafe { Box::from_raw(cur) });
        let retired = match self.retired.get_mut() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        for r in retired.drain(..) {
            drop(unsafe { Box::from_raw(r.ptr) });
        }
    }
}

/// A registered reader. One per thread; the slot is released on drop.
pub struct HeaderReader {
    cache: Arc<HeaderCache>,
    slot: usize,
}

impl HeaderReader {
    /// Copy of the current header value.
    pub fn load(&mut self) -> DateBytes {
        let mut out = [0u8; HTTP_DATE_LEN];
        self.cache.load_into(self.slot, &mut out);
        out
    }
}

impl Drop for HeaderReader {
    fn drop(&mut self) {
        let s = &self.cache.slots[self.slot];
        s.epoch.store(0, Ordering::SeqCst);
        s.claimed.store(false, Ordering::Release);
    }
}

fn format_date(unix: i64) -> DateBytes {
    let mut buf = Vec::with_capacity(HTTP_DATE_LEN);
    put_http_date(&mut buf, unix);
    // Years past 9999 would widen the value; keep the fixed width.
    let mut out = [b' '; HTTP_DATE_LEN];
    let n = buf.len().min(HTTP_DATE_LEN);
    out[..n].copy_from_slice(&buf[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_replaces_value() {
        let cache = Arc::new(HeaderCache::new(2, 784111777));
        let mut r = cache.reader().unwrap();
        assert_eq!(&r.load(), b"Sun, 06 Nov 1994 08:49:37 GMT");
        cache.publish(784111778);
        assert_eq!(&r.load(), b"Sun, 06 Nov 1994 08:49:38 GMT");
    }

    #[test]
    fn reader_slots_are_bounded_and_reusable() {
        let cache = Arc::new(HeaderCache::new(1, 0));
        let r = cache.reader().unwrap();
        assert!(cache.reader().is_none());
        drop(r);
        assert!(cache.reader().is_some());
    }

    #[test]
    fn idle_readers_do_not_hold_back_reclamation() {
        let cache = Arc::new(HeaderCache::new(4, 0));
        let mut r = cache.reader().unwrap();
        for t in 1..10 {
            cache.publish(t);
            let _ = r.load();
        }
        assert_eq!(cache.retired_len(), 0);
    }

    #[test]
    fn active_slot_holds_back_reclamation() {
        let cache = Arc::new(HeaderCache::new(2, 0));
        // Simulate a reader stalled mid-copy at the current epoch.
        let e = cache.epoch.load(Ordering::SeqCst);
        cache.slots[0].epoch.store(e, Ordering::SeqCst);
        cache.publish(1);
        cache.publish(2);
        // The stalled reader may have loaded either buffer.
        assert_eq!(cache.retired_len(), 2);
        cache.slots[0].epoch.store(0, Ordering::SeqCst);
        cache.publish(3);
        assert_eq!(cache.retired_len(), 0);
    }

    #[test]
    fn concurrent_readers_always_see_whole_values() {
        let cache = Arc::new(HeaderCache::new(5, 1_700_000_000));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut r = cache.reader().unwrap();
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut seen = 0u64;
                    loop {
                        let v = r.load();
                        assert!(v.ends_with(b" GMT"));
                        assert_eq!(v[3], b',');
                        assert!(v.iter().all(|b| b.is_ascii_graphic() || *b == b' '));
                        seen += 1;
                        if stop.load(Ordering::Relaxed) {
                            return seen;
                        }
                    }
                })
            })
            .collect();

        for i in 0..2000 {
            cache.publish(1_700_000_000 + i * 3661);
        }
        stop.store(true, Ordering::Relaxed);
        for t in readers {
            assert!(t.join().unwrap() > 0);
        }
    }
}
