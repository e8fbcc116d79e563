use std::sync::Arc;

use clap::Parser;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use syslogd_core::sinks::{NullPubSubSink, NullRelationalSink, PubSubSink, RelationalSink};
use syslogd_core::{ActiveNodes, ArchiveWriter, ClassificationEngine, Counters, Dispatcher, Ingest, RingCache};

use syslogd::{sinks, AppState, Settings};

/// A no-frills syslog collector: UDP/unix-datagram/TCP ingest, per-tag
/// classification, and a ring-cache HTTP adapter.
#[derive(Parser)]
#[command(name = "gosyslogd")]
struct Cli {
    /// Echo unmatched messages to standard output.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// Subscribe to the `logging` topic and stream it to standard output
    /// instead of starting the server.
    #[arg(long = "tail")]
    tail: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&settings.log_level)).init();

    if cli.tail {
        run_tail(&settings).await;
        return;
    }

    let own_hostname =
        hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "localhost".to_owned());

    let classifier = match ClassificationEngine::load(&settings.core.rules_dir) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to load classification rules");
            std::process::exit(1);
        }
    };

    let (supervisory_tx, mut supervisory_rx) = syslogd_core::error::channel();
    let archive = ArchiveWriter::new(settings.core.log_dir.clone());
    let active_nodes = Arc::new(ActiveNodes::new());
    let ring = Arc::new(RingCache::new());
    let counters = Arc::new(Counters::new());

    let pubsub: Arc<dyn PubSubSink> = match &settings.redis_url {
        Some(url) => match sinks::RedisSink::connect(url).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!(error = %e, "failed to connect to redis, pub/sub sink disabled");
                Arc::new(NullPubSubSink)
            }
        },
        None => Arc::new(NullPubSubSink),
    };

    let relational: Arc<dyn RelationalSink> = match &settings.database_url {
        Some(url) => match sinks::PostgresSink::connect(url).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to connect to postgres, relational sink disabled");
                Arc::new(NullRelationalSink)
            }
        },
        None => Arc::new(NullRelationalSink),
    };

    let (ingest, consumer, shutdown_tx) =
        Ingest::new(&settings.core, own_hostname, archive.clone(), active_nodes, supervisory_tx.clone());

    match ingest.spawn_udp(shutdown_tx.subscribe()).await {
        Ok((addr, _handle)) => info!(%addr, "udp listener bound"),
        Err(e) => error!(error = %e, "failed to bind udp listener"),
    }
    ingest.spawn_unix(shutdown_tx.subscribe());
    match ingest.spawn_tcp(shutdown_tx.subscribe()).await {
        Ok((addr, _handle)) => info!(%addr, "tcp listener bound"),
        Err(e) => error!(error = %e, "failed to bind tcp listener"),
    }
    archive.spawn_syncer();
    classifier.clone().spawn_hot_reload(supervisory_tx.clone());
    spawn_sighup_reopen(archive.clone());

    tokio::spawn(async move {
        while let Some(event) = supervisory_rx.recv().await {
            warn!(?event, "supervisory event");
        }
    });

    let dispatcher = Dispatcher::new(classifier, ring.clone(), counters.clone(), pubsub, relational, cli.verbose);
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(consumer).await });

    let state = AppState { ring, counters };
    let router = syslogd::http::build_router(state);
    let listener = tokio::net::TcpListener::bind(&settings.http_addr).await.expect("failed to bind http listener");
    info!(addr = %settings.http_addr, "http adapter listening");

    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown_tx)).await {
        error!(error = %e, "http server error");
    }

    let _ = dispatcher_handle.await;
    archive.close_all();
    info!("shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C, then signals every listener and the
/// dispatcher to stop.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); }
        _ = terminate => { info!("received SIGTERM, shutting down"); }
    }
    let _ = shutdown_tx.send(true);
}

/// SIGHUP does not stop the daemon — it only tells the archive writer to
/// close its files so the next write reopens fresh handles, supporting
/// external log rotation.
#[cfg(unix)]
fn spawn_sighup_reopen(archive: Arc<ArchiveWriter>) {
    tokio::spawn(async move {
        let mut sighup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            sighup.recv().await;
            info!("received SIGHUP, reopening archive files");
            archive.close_all();
        }
    });
}

#[cfg(not(unix))]
fn spawn_sighup_reopen(_archive: Arc<ArchiveWriter>) {}

/// `-tail`: subscribe to the `logging` topic and print raw payloads to
/// standard output. Does not start the server.
async fn run_tail(settings: &Settings) {
    let Some(redis_url) = &settings.redis_url else {
        eprintln!("REDIS_URL must be set for -tail mode");
        std::process::exit(1);
    };
    let client = match redis::Client::open(redis_url.as_str()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to open redis client: {e}");
            std::process::exit(1);
        }
    };
    let mut pubsub = match client.get_async_pubsub().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to connect to redis: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = pubsub.subscribe("logging").await {
        eprintln!("failed to subscribe to logging topic: {e}");
        std::process::exit(1);
    }
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        if let Ok(payload) = msg.get_payload::<Vec<u8>>() {
            println!("{}", String::from_utf8_lossy(&payload));
        }
    }
}
