//! The dispatcher: the single consumer loop that drains the ingest queue,
//! updates counters and ring-cache buckets, classifies each message, and
//! routes it to the configured sinks.

use std::sync::Arc;

use tracing::info;

use crate::ingest::Consumer;
use crate::ring::RingCache;
use crate::rules::{ClassificationEngine, NULL_FINGERPRINT};
use crate::sinks::{PubSubSink, RelationalSink, Topic};
use crate::stats::Counters;

pub struct Dispatcher {
    classifier: Arc<ClassificationEngine>,
    ring: Arc<RingCache>,
    counters: Arc<Counters>,
    pubsub: Arc<dyn PubSubSink>,
    relational: Arc<dyn RelationalSink>,
    /// `-v`: echo unmatched messages to standard output.
    echo_unmatched: bool,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<ClassificationEngine>,
        ring: Arc<RingCache>,
        counters: Arc<Counters>,
        pubsub: Arc<dyn PubSubSink>,
        relational: Arc<dyn RelationalSink>,
        echo_unmatched: bool,
    ) -> Arc<Dispatcher> {
        Arc::new(Dispatcher { classifier, ring, counters, pubsub, relational, echo_unmatched })
    }

    /// Drains `consumer` until it returns `None`, which terminates the
    /// loop (and, for the real binary, the process).
    pub async fn run(&self, mut consumer: Consumer) {
        while let Some(message) = consumer.next().await {
            self.dispatch_one(message).await;
        }
        info!("ingest queue closed, dispatcher exiting");
    }

    async fn dispatch_one(&self, message: Arc<syslogd_protocol::Message>) {
        let priority_string = message.priority_string();

        self.counters.tag(&message.tag);
        self.counters.host(&message.hostname);
        self.counters.priority(&priority_string);

        self.ring.add_string(&message.tag, message.clone());
        self.ring.add_string(&message.hostname, message.clone());
        self.ring.add_string(&priority_string, message.clone());

        if !self.classifier.has_tag(&message.tag) {
            return;
        }

        match self.classifier.check(&message.tag, &message.raw) {
            Some(rule) => {
                if rule.importance >= 2 {
                    self.relational.add_unhandled(&rule.fingerprint, &message.raw).await;
                    self.pubsub.publish(Topic::Critical, &message.raw).await;
                }
                self.ring.add(&rule.fingerprint, message.clone());
            }
            None => {
                self.relational.add_unhandled(NULL_FINGERPRINT, &message.raw).await;
                self.ring.add(NULL_FINGERPRINT, message.clone());
                self.pubsub.publish(Topic::Logging, &message.raw).await;
                if self.echo_unmatched {
                    println!("{}", String::from_utf8_lossy(&message.raw));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::config::Options;
    use crate::ingest::Ingest;
    use crate::sinks::test_support::{RecordingPubSubSink, RecordingRelationalSink};
    use crate::stats::ActiveNodes;

    fn raw_syslog(tag: &str, body: &str) -> Vec<u8> {
        format!("<13>Jan  1 00:00:00 host {tag}[1]: {body}").into_bytes()
    }

    async fn build(rules_dir: &std::path::Path) -> (Arc<Dispatcher>, Arc<Ingest>, Consumer, Arc<RecordingPubSubSink>, Arc<RecordingRelationalSink>) {
        let options = Options { rules_dir: rules_dir.to_owned(), ..Options::default() };
        let classifier = Arc::new(ClassificationEngine::load(&options.rules_dir).unwrap());
        let ring = Arc::new(RingCache::new());
        let counters = Arc::new(Counters::new());
        let pubsub = Arc::new(RecordingPubSubSink::default());
        let relational = Arc::new(RecordingRelationalSink::default());
        let dispatcher = Dispatcher::new(
            classifier,
            ring,
            counters,
            pubsub.clone(),
            relational.clone(),
            false,
        );
        let (supervisory_tx, _rx) = crate::error::channel();
        let archive = ArchiveWriter::new(None);
        let active_nodes = Arc::new(ActiveNodes::new());
        let (ingest, consumer, _shutdown) =
            Ingest::new(&options, "host".to_owned(), archive, active_nodes, supervisory_tx);
        (dispatcher, ingest, consumer, pubsub, relational)
    }

    fn write_rule_file(dir: &std::path::Path, tag: &str, lines: &[&str]) {
        std::fs::write(dir.join(tag), lines.join("\n") + "\n").unwrap();
    }

    #[tokio::test]
    async fn high_importance_match_routes_to_relational_and_critical() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "sshd", &["!!failed password"]);
        let (dispatcher, ingest, mut consumer, pubsub, relational) = build(dir.path()).await;

        ingest.handle_datagram(&raw_syslog("sshd", "failed password for root"), 0, None).await;
        let msg = consumer.next().await.unwrap();
        dispatcher.dispatch_one(msg).await;

        assert_eq!(relational.rows.lock().unwrap().len(), 1);
        let published = pubsub.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, Topic::Critical);
    }

    #[tokio::test]
    async fn low_importance_match_only_updates_ring_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "sshd", &["session opened"]);
        let (dispatcher, ingest, mut consumer, pubsub, relational) = build(dir.path()).await;

        ingest.handle_datagram(&raw_syslog("sshd", "session opened for user"), 0, None).await;
        let msg = consumer.next().await.unwrap();
        dispatcher.dispatch_one(msg).await;

        assert!(relational.rows.lock().unwrap().is_empty());
        assert!(pubsub.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_message_routes_null_fingerprint_and_logging_topic() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "sshd", &["never matches this exact phrase"]);
        let (dispatcher, ingest, mut consumer, pubsub, relational) = build(dir.path()).await;

        ingest.handle_datagram(&raw_syslog("sshd", "totally unrelated text"), 0, None).await;
        let msg = consumer.next().await.unwrap();
        dispatcher.dispatch_one(msg).await;

        let rows = relational.rows.lock().unwrap();
        assert_eq!(rows[0].0, NULL_FINGERPRINT);
        let published = pubsub.published.lock().unwrap();
        assert_eq!(published[0].0, Topic::Logging);
    }

    #[tokio::test]
    async fn unknown_tag_skips_classification_entirely() {
        let dir = tempfile::tempdir().unwrap();
        write_rule_file(dir.path(), "sshd", &["anything"]);
        let (dispatcher, ingest, mut consumer, pubsub, relational) = build(dir.path()).await;

        ingest.handle_datagram(&raw_syslog("cron", "job ran"), 0, None).await;
        let msg = consumer.next().await.unwrap();
        dispatcher.dispatch_one(msg).await;

        assert!(relational.rows.lock().unwrap().is_empty());
        assert!(pubsub.published.lock().unwrap().is_empty());
    }
}
