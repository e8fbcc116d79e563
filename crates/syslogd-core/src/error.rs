//! Errors that compromise daemon-wide invariants are surfaced here instead of
//! propagated by unwinding (spec §7's propagation policy). Transport/consumer
//! task errors stay confined to the task; only the events below leave it.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Supervisory {
    /// A packet failed to parse (dropped, counted, not fatal).
    ParseFailed { source: Option<SocketAddr>, reason: String },
    /// A datagram listener's task exited; the server is now degraded for
    /// that transport.
    TransportDegraded { transport: &'static str, reason: String },
    /// An archive file's open/write failed. The file is evicted from the
    /// index; the next write retries.
    ArchiveIoError { path: PathBuf, reason: String },
    /// A rule file failed to recompile on hot reload; the old `RuleSet` is
    /// retained.
    RuleReloadFailed { tag: String, reason: String },
}

pub type SupervisoryTx = mpsc::UnboundedSender<Supervisory>;
pub type SupervisoryRx = mpsc::UnboundedReceiver<Supervisory>;

/// Build a fresh supervisory channel pair.
pub fn channel() -> (SupervisoryTx, SupervisoryRx) {
    mpsc::unbounded_channel()
}
