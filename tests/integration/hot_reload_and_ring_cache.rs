//! Rewriting a rule file on disk changes what the classifier matches without
//! restarting anything, and the ring cache keeps serving by-fingerprint
//! history across that swap.

use std::sync::Arc;
use std::time::Duration;

use syslogd_core::ClassificationEngine;

fn write_rule_file(dir: &std::path::Path, tag: &str, lines: &[&str]) {
    std::fs::write(dir.join(tag), lines.join("\n") + "\n").unwrap();
}

#[tokio::test]
async fn editing_a_rule_file_on_disk_changes_future_matches() {
    let dir = tempfile::tempdir().unwrap();
    write_rule_file(dir.path(), "cron", &["job started"]);

    let engine = Arc::new(ClassificationEngine::load(dir.path()).unwrap());
    assert!(engine.check("cron", b"job started at noon").is_some());
    assert!(engine.check("cron", b"job failed at noon").is_none());

    let (supervisory_tx, mut supervisory_rx) = syslogd_core::error::channel();
    let reload_handle = engine.clone().spawn_hot_reload(supervisory_tx);

    // Backdate then rewrite so the mtime poll sees a change; the poll
    // interval itself is 10s so we drive it with a paused clock instead of
    // sleeping in real time.
    tokio::time::pause();
    write_rule_file(dir.path(), "cron", &["job failed"]);
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::time::resume();

    // Give the background task a chance to run after the clock advance.
    for _ in 0..50 {
        if engine.check("cron", b"job failed at noon").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(engine.check("cron", b"job failed at noon").is_some());
    assert!(engine.check("cron", b"job started at noon").is_none());
    assert!(supervisory_rx.try_recv().is_err(), "a clean reload should not emit a supervisory event");

    reload_handle.abort();
}

#[tokio::test]
async fn ring_cache_serves_history_by_fingerprint_across_many_tags() {
    let dir = tempfile::tempdir().unwrap();
    write_rule_file(dir.path(), "sshd", &["!!break-in attempt"]);
    let engine = ClassificationEngine::load(dir.path()).unwrap();

    let rule = engine.check("sshd", b"break-in attempt from 1.2.3.4").unwrap();
    let ring = syslogd_core::RingCache::new();

    let message = make_message("sshd", "break-in attempt from 1.2.3.4");
    ring.add(&rule.fingerprint, message.clone());
    ring.add(&rule.fingerprint, message.clone());

    let history = ring.query_last_fingerprint(&rule.fingerprint, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert!(ring.query_last_fingerprint("00000000000000000000000000000000", 10).is_none());
}

fn make_message(tag: &str, body: &str) -> Arc<syslogd_protocol::Message> {
    let raw = format!("<13>Jan  1 00:00:00 host {tag}[1]: {body}");
    Arc::new(syslogd_protocol::parse(raw.as_bytes(), 0, "collector").unwrap())
}
