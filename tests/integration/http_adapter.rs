//! The HTTP adapter on top of the ring cache and counters: `/log`,
//! `/stream`, and `/debug/vars`, driven over a real bound socket.

use std::sync::Arc;

use syslogd_core::{Counters, RingCache};
use syslogd::{http::build_router, AppState};

fn make_message(tag: &str, body: &str) -> Arc<syslogd_protocol::Message> {
    let raw = format!("<13>Jan  1 00:00:00 host {tag}[1]: {body}");
    Arc::new(syslogd_protocol::parse(raw.as_bytes(), 0, "collector").unwrap())
}

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn log_endpoint_returns_404_for_an_unknown_fingerprint() {
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());
    let base = spawn_server(AppState { ring, counters }).await;

    let resp = reqwest::get(format!("{base}/log?md5=00000000000000000000000000000000")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn log_endpoint_returns_newest_first_for_a_known_fingerprint() {
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());

    let fingerprint = "abababababababababababababababab";
    ring.add(fingerprint, make_message("sshd", "first"));
    ring.add(fingerprint, make_message("sshd", "second"));

    let base = spawn_server(AppState { ring, counters }).await;

    let resp = reqwest::get(format!("{base}/log?md5={fingerprint}&max=10")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries[0]["raw"].as_str().unwrap().contains("second"));
    assert!(entries[1]["raw"].as_str().unwrap().contains("first"));
}

#[tokio::test]
async fn debug_vars_reports_accumulated_counters() {
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());
    counters.tag("sshd");
    counters.tag("sshd");
    counters.host("box1");

    let base = spawn_server(AppState { ring, counters }).await;

    let resp = reqwest::get(format!("{base}/debug/vars")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["tags"]["sshd"], 2);
    assert_eq!(body["hosts"]["box1"], 1);
}
