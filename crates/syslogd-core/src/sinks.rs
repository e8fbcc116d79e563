//! Trait boundaries for the two external collaborators: a pub/sub fan-out
//! sink (`critical`/`logging` topics) and a relational sink (monthly tables
//! keyed by fingerprint). Concrete backends (Redis, Postgres) are injected
//! by the binary crate — nothing here knows about either.

use async_trait::async_trait;

/// The `critical` topic carries messages matched by a rule of importance
/// ≥ 2; `logging` carries everything else that reaches the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Critical,
    Logging,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Critical => "critical",
            Topic::Logging => "logging",
        }
    }
}

#[async_trait]
pub trait PubSubSink: Send + Sync {
    async fn publish(&self, topic: Topic, raw: &[u8]);
}

#[async_trait]
pub trait RelationalSink: Send + Sync {
    /// Enqueue `(fingerprint, raw)` for the current month's table. Backed
    /// by the implementation's own bounded queue; this only blocks if that
    /// queue is saturated.
    async fn add_unhandled(&self, fingerprint: &str, raw: &[u8]);
}

/// No-op sinks used when a configuration leaves `Redis`/`Postgres` unset,
/// and in tests that don't care about sink traffic.
pub struct NullPubSubSink;

#[async_trait]
impl PubSubSink for NullPubSubSink {
    async fn publish(&self, _topic: Topic, _raw: &[u8]) {}
}

pub struct NullRelationalSink;

#[async_trait]
impl RelationalSink for NullRelationalSink {
    async fn add_unhandled(&self, _fingerprint: &str, _raw: &[u8]) {}
}
