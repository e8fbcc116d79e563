//! Fixed-capacity circular buffers keyed by fingerprint, with non-blocking
//! pub/sub fan-out. One bucket per tag, per host, per priority name, plus
//! the [`rules::NULL_FINGERPRINT`](crate::rules::NULL_FINGERPRINT) bucket
//! for messages no rule matched.
//!
//! `query_last` walks backwards from the most recently written slot and
//! never reads past the number of slots actually filled — the wraparound
//! bug in the buffer this distills (`Range()` over-reading stale slots
//! right after the buffer first wraps) does not reproduce here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use syslogd_protocol::Message;

use crate::rules::{fingerprint_of, NULL_FINGERPRINT};

/// Slots per bucket.
pub const BUCKET_CAPACITY: usize = 1024;
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// A live subscription to one bucket. Dropping it (or letting `recv()` go
/// unread until the channel fills) unsubscribes it on the next push.
pub struct Subscription {
    id: u64,
    pub rx: mpsc::Receiver<Arc<Message>>,
}

struct RingBucket {
    slots: Vec<Option<Arc<Message>>>,
    next: usize,
    filled: usize,
    subscribers: HashMap<u64, mpsc::Sender<Arc<Message>>>,
    next_subscriber_id: u64,
}

impl RingBucket {
    fn new() -> Self {
        Self {
            slots: vec![None; BUCKET_CAPACITY],
            next: 0,
            filled: 0,
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        }
    }

    fn add(&mut self, msg: Arc<Message>) {
        self.slots[self.next] = Some(msg.clone());
        self.next = (self.next + 1) % BUCKET_CAPACITY;
        self.filled = (self.filled + 1).min(BUCKET_CAPACITY);
        // Non-blocking fan-out: a subscriber whose channel is full (or
        // closed) is dropped from the bucket instead of stalling ingest.
        self.subscribers.retain(|_, tx| tx.try_send(msg.clone()).is_ok());
    }

    fn query_last(&self, n: usize) -> Vec<Arc<Message>> {
        // A max of 0 means "as much as the buffer holds".
        let n = if n == 0 { self.filled } else { n.min(self.filled) };
        let mut out = Vec::with_capacity(n);
        let mut idx = (self.next + BUCKET_CAPACITY - 1) % BUCKET_CAPACITY;
        for _ in 0..n {
            if let Some(m) = &self.slots[idx] {
                out.push(m.clone());
            }
            idx = (idx + BUCKET_CAPACITY - 1) % BUCKET_CAPACITY;
        }
        out
    }

    fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.insert(id, tx);
        Subscription { id, rx }
    }

    fn unsubscribe(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// All of a daemon's ring buckets, keyed by fingerprint.
#[derive(Default)]
pub struct RingCache {
    buckets: Mutex<HashMap<String, RingBucket>>,
    /// Memoizes `key -> fingerprint` so repeated keys (a tag seen on every
    /// message, say) skip recomputing the digest.
    memo: RwLock<HashMap<String, String>>,
    total_adds: AtomicU64,
}

impl RingCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint_for_key(&self, key: &str) -> String {
        if let Some(fp) = self.memo.read().unwrap().get(key) {
            return fp.clone();
        }
        let mut memo = self.memo.write().unwrap();
        memo.entry(key.to_owned()).or_insert_with(|| fingerprint_of(key.as_bytes())).clone()
    }

    /// Hash `key` (a tag, host, or priority name) to its bucket fingerprint
    /// and append `msg`. Returns the fingerprint, which callers route on.
    pub fn add_string(&self, key: &str, msg: Arc<Message>) -> String {
        let fingerprint = self.fingerprint_for_key(key);
        self.add(&fingerprint, msg);
        fingerprint
    }

    /// Append `msg` to the bucket already identified by `fingerprint`,
    /// creating it if this is its first message.
    pub fn add(&self, fingerprint: &str, msg: Arc<Message>) {
        self.total_adds.fetch_add(1, Ordering::Relaxed);
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(fingerprint.to_owned()).or_insert_with(RingBucket::new).add(msg);
    }

    /// Append `msg` to the catch-all bucket for unmatched messages.
    pub fn add_unmatched(&self, msg: Arc<Message>) {
        self.add(NULL_FINGERPRINT, msg);
    }

    /// Up to `n` most recent messages for `key`'s bucket, newest first.
    /// `n = 0` means "as many as the bucket holds". `None` means the
    /// fingerprint has never been written to — the caller's "not found".
    pub fn query_last(&self, key: &str, n: usize) -> Option<Vec<Arc<Message>>> {
        self.query_last_fingerprint(&self.fingerprint_for_key(key), n)
    }

    pub fn query_last_fingerprint(&self, fingerprint: &str, n: usize) -> Option<Vec<Arc<Message>>> {
        self.buckets.lock().unwrap().get(fingerprint).map(|b| b.query_last(n))
    }

    /// Subscribe to future messages appended to `key`'s bucket.
    pub fn subscribe(&self, key: &str) -> Subscription {
        self.subscribe_fingerprint(&fingerprint_of(key.as_bytes()))
    }

    pub fn subscribe_fingerprint(&self, fingerprint: &str) -> Subscription {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(fingerprint.to_owned()).or_insert_with(RingBucket::new).subscribe()
    }

    pub fn unsubscribe(&self, fingerprint: &str, sub: &Subscription) {
        if let Some(bucket) = self.buckets.lock().unwrap().get_mut(fingerprint) {
            bucket.unsubscribe(sub.id);
        }
    }

    pub fn subscriber_count(&self, fingerprint: &str) -> usize {
        self.buckets.lock().unwrap().get(fingerprint).map(|b| b.subscriber_count()).unwrap_or(0)
    }

    pub fn total_adds(&self) -> u64 {
        self.total_adds.load(Ordering::Relaxed)
    }
}
