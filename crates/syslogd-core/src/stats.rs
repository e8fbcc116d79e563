//! Process-wide named-map counters, rendered on demand as JSON for
//! `/debug/vars`. Mirrors `expvar.Map` in the original daemon: three
//! independent maps (`tags`, `hosts`, `pri`), each a plain counter per key.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Map(RwLock<HashMap<String, u64>>);

impl Map {
    fn incr(&self, key: &str) {
        let mut guard = self.0.write().unwrap();
        *guard.entry(key.to_owned()).or_insert(0) += 1;
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.0.read().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    tags: Map,
    hosts: Map,
    pri: Map,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(&self, tag: &str) {
        self.tags.incr(tag);
    }

    pub fn host(&self, host: &str) {
        self.hosts.incr(host);
    }

    pub fn priority(&self, pri: &str) {
        self.pri.incr(pri);
    }

    /// Render as the `{tags, hosts, pri}` map `/debug/vars` serves.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tags": self.tags.snapshot(),
            "hosts": self.hosts.snapshot(),
            "pri": self.pri.snapshot(),
        })
    }
}

/// Remote senders observed, keyed by address string, used to compute the
/// "peers seen in the last N seconds" observability figure.
#[derive(Debug, Default)]
pub struct ActiveNodes {
    last_seen: RwLock<HashMap<String, Instant>>,
}

impl ActiveNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, addr: &str) {
        self.last_seen.write().unwrap().insert(addr.to_owned(), Instant::now());
    }

    pub fn active_within(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.last_seen
            .read()
            .unwrap()
            .values()
            .filter(|t| now.saturating_duration_since(**t) <= window)
            .count()
    }
}
