//! The ingest server: UDP, unix-datagram, and TCP listeners, each in its
//! own task, all funneling parsed messages through the same entry path
//! (archive, then enqueue) onto one bounded consumer queue.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, UdpSocket, UnixDatagram};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use syslogd_protocol::Message;

use crate::archive::ArchiveWriter;
use crate::config::Options;
use crate::error::{Supervisory, SupervisoryTx};
use crate::stats::ActiveNodes;

const UDP_DATAGRAM_MAX: usize = 64 * 1024;

/// Consumer-side handle: `next()` dequeues, honoring a shutdown signal.
pub struct Consumer {
    rx: mpsc::Receiver<Arc<Message>>,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    /// Returns `None` once shutdown is signaled or every producer has
    /// dropped — either terminates the dispatcher loop.
    pub async fn next(&mut self) -> Option<Arc<Message>> {
        if *self.shutdown.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => None,
            msg = self.rx.recv() => msg,
        }
    }
}

/// Shared entry path for all three listeners: parse, archive, enqueue.
pub struct Ingest {
    queue_tx: mpsc::Sender<Arc<Message>>,
    archive: Arc<ArchiveWriter>,
    active_nodes: Arc<ActiveNodes>,
    supervisory: SupervisoryTx,
    own_hostname: String,
    sock_addr: String,
    unix_path: std::path::PathBuf,
}

impl Ingest {
    pub fn new(
        options: &Options,
        own_hostname: String,
        archive: Arc<ArchiveWriter>,
        active_nodes: Arc<ActiveNodes>,
        supervisory: SupervisoryTx,
    ) -> (Arc<Ingest>, Consumer, watch::Sender<bool>) {
        let (queue_tx, queue_rx) = mpsc::channel(options.buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingest = Arc::new(Ingest {
            queue_tx,
            archive,
            active_nodes,
            supervisory,
            own_hostname,
            sock_addr: options.sock_addr.clone(),
            unix_path: options.unix_path.clone(),
        });
        (ingest, Consumer { rx: queue_rx, shutdown: shutdown_rx }, shutdown_tx)
    }

    pub(crate) async fn handle_datagram(&self, data: &[u8], n: usize, source: Option<SocketAddr>) {
        if let Some(addr) = source {
            self.active_nodes.record(&addr.to_string());
        }
        self.ingest_buffer(data, n, source).await;
    }

    async fn ingest_buffer(&self, data: &[u8], n: usize, source: Option<SocketAddr>) {
        match syslogd_protocol::parse(data, n, &self.own_hostname) {
            Ok(mut message) => {
                message.received_epoch_millis = chrono::Utc::now().timestamp_millis();
                self.archive.write(&message.hostname, &message.raw, &self.supervisory);
                if self.queue_tx.send(Arc::new(message)).await.is_err() {
                    debug!("ingest queue consumer gone, dropping message");
                }
            }
            Err(e) => {
                let _ = self.supervisory.send(Supervisory::ParseFailed { source, reason: e.to_string() });
            }
        }
    }

    /// `:PORT` style addresses bind on all interfaces, matching the
    /// source's convention of an address with no host part.
    fn resolve_bind_addr(&self) -> String {
        if let Some(rest) = self.sock_addr.strip_prefix(':') {
            format!("0.0.0.0:{rest}")
        } else {
            self.sock_addr.clone()
        }
    }

    /// Binds synchronously so a bad address fails startup immediately
    /// rather than being reported later on the supervisory channel; returns
    /// the bound address (useful when `SockAddr` asks for an ephemeral
    /// port, as tests do) alongside the listener task.
    pub async fn spawn_udp(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let socket = UdpSocket::bind(self.resolve_bind_addr()).await?;
        let local_addr = socket.local_addr()?;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; UDP_DATAGRAM_MAX];
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((n, addr)) => this.handle_datagram(&buf, n, Some(addr)).await,
                            Err(e) => {
                                let _ = this.supervisory.send(Supervisory::TransportDegraded {
                                    transport: "udp",
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        });
        Ok((local_addr, handle))
    }

    pub fn spawn_unix(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let _ = std::fs::remove_file(&this.unix_path);
            let socket = match UnixDatagram::bind(&this.unix_path) {
                Ok(s) => s,
                Err(e) => {
                    let _ = this
                        .supervisory
                        .send(Supervisory::TransportDegraded { transport: "unix", reason: e.to_string() });
                    return;
                }
            };
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&this.unix_path, std::fs::Permissions::from_mode(0o666));
            }
            let mut buf = vec![0u8; UDP_DATAGRAM_MAX];
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = socket.recv(&mut buf) => {
                        match result {
                            Ok(n) => this.handle_datagram(&buf, n, None).await,
                            Err(e) => {
                                let _ = this.supervisory.send(Supervisory::TransportDegraded {
                                    transport: "unix",
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        })
    }

    pub async fn spawn_tcp(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(self.resolve_bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _addr)) => {
                                let conn = this.clone();
                                let conn_shutdown = shutdown.clone();
                                tokio::spawn(async move { conn.serve_tcp_connection(stream, conn_shutdown).await });
                            }
                            Err(e) => {
                                let _ = this.supervisory.send(Supervisory::TransportDegraded {
                                    transport: "tcp",
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        });
        Ok((local_addr, handle))
    }

    async fn serve_tcp_connection(self: Arc<Self>, stream: tokio::net::TcpStream, mut shutdown: watch::Receiver<bool>) {
        let mut reader = tokio::io::BufReader::new(stream);
        let mut frame = Vec::new();
        loop {
            frame.clear();
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = reader.read_until(b'\n', &mut frame) => {
                    match result {
                        Ok(0) => break,
                        Ok(_) => {
                            // Frame is already exactly sized; 0 tells the
                            // parser to use the whole slice.
                            self.ingest_buffer(&frame, 0, None).await;
                        }
                        Err(e) => {
                            warn!(error = %e, "tcp connection read error, closing this connection only");
                            break;
                        }
                    }
                }
            }
        }
    }
}
