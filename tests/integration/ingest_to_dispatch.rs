//! End-to-end: a real UDP datagram in, through parsing, classification,
//! ring cache and counters, out to recording sinks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use syslogd_core::sinks::{PubSubSink, RelationalSink, Topic};
use syslogd_core::{ActiveNodes, ArchiveWriter, ClassificationEngine, Counters, Dispatcher, Ingest, RingCache};
use syslogd_core::config::Options;

#[derive(Default)]
struct RecordingPubSub {
    published: Mutex<Vec<(Topic, Vec<u8>)>>,
}

#[async_trait]
impl PubSubSink for RecordingPubSub {
    async fn publish(&self, topic: Topic, raw: &[u8]) {
        self.published.lock().unwrap().push((topic, raw.to_vec()));
    }
}

#[derive(Default)]
struct RecordingRelational {
    rows: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl RelationalSink for RecordingRelational {
    async fn add_unhandled(&self, fingerprint: &str, raw: &[u8]) {
        self.rows.lock().unwrap().push((fingerprint.to_owned(), raw.to_vec()));
    }
}

fn write_rule_file(dir: &std::path::Path, tag: &str, lines: &[&str]) {
    std::fs::write(dir.join(tag), lines.join("\n") + "\n").unwrap();
}

#[tokio::test]
async fn udp_datagram_is_classified_and_routed_to_critical() {
    let rules_dir = tempfile::tempdir().unwrap();
    write_rule_file(rules_dir.path(), "sshd", &["!!authentication failure"]);

    let options = Options { sock_addr: "127.0.0.1:0".to_owned(), rules_dir: rules_dir.path().to_owned(), ..Options::default() };

    let classifier = Arc::new(ClassificationEngine::load(&options.rules_dir).unwrap());
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());
    let pubsub = Arc::new(RecordingPubSub::default());
    let relational = Arc::new(RecordingRelational::default());
    let (supervisory_tx, _supervisory_rx) = syslogd_core::error::channel();
    let archive = ArchiveWriter::new(None);
    let active_nodes = Arc::new(ActiveNodes::new());

    let (ingest, consumer, shutdown_tx) =
        Ingest::new(&options, "collector".to_owned(), archive, active_nodes, supervisory_tx);

    let (bound_addr, _listener_handle) = ingest.spawn_udp(shutdown_tx.subscribe()).await.unwrap();

    let dispatcher = Dispatcher::new(classifier, ring.clone(), counters.clone(), pubsub.clone(), relational.clone(), false);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(consumer).await });

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(b"<13>Jan  1 00:00:00 host sshd[123]: authentication failure for root", bound_addr)
        .await
        .unwrap();

    // Give the listener and dispatcher a moment to drain the datagram.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(relational.rows.lock().unwrap().len(), 1);
    let published = pubsub.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, Topic::Critical);
    drop(published);

    let vars = counters.to_json();
    assert_eq!(vars["tags"]["sshd"], 1);
    assert_eq!(vars["hosts"]["host"], 1);

    shutdown_tx.send(true).unwrap();
    let _ = dispatcher_handle.await;
}

#[tokio::test]
async fn malformed_udp_datagram_does_not_reach_dispatcher() {
    let rules_dir = tempfile::tempdir().unwrap();
    write_rule_file(rules_dir.path(), "sshd", &["anything"]);
    let options = Options { sock_addr: "127.0.0.1:0".to_owned(), rules_dir: rules_dir.path().to_owned(), ..Options::default() };

    let classifier = Arc::new(ClassificationEngine::load(&options.rules_dir).unwrap());
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());
    let (supervisory_tx, mut supervisory_rx) = syslogd_core::error::channel();
    let archive = ArchiveWriter::new(None);
    let active_nodes = Arc::new(ActiveNodes::new());

    let (ingest, consumer, shutdown_tx) =
        Ingest::new(&options, "collector".to_owned(), archive, active_nodes, supervisory_tx);
    let (bound_addr, _handle) = ingest.spawn_udp(shutdown_tx.subscribe()).await.unwrap();

    let pubsub = Arc::new(RecordingPubSub::default());
    let relational = Arc::new(RecordingRelational::default());
    let dispatcher = Dispatcher::new(classifier, ring, counters, pubsub, relational, false);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(consumer).await });

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.send_to(b"this is not a syslog line at all", bound_addr).await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), supervisory_rx.recv()).await.unwrap().unwrap();
    match event {
        syslogd_core::error::Supervisory::ParseFailed { .. } => {}
        other => panic!("expected ParseFailed, got {other:?}"),
    }

    shutdown_tx.send(true).unwrap();
    let _ = dispatcher_handle.await;
}
