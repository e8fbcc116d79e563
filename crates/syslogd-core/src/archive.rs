//! The archive writer: one append-only file per host per day, buffered and
//! debounced, reopened on demand to cooperate with external log rotation.

use std::collections::HashMap;
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Supervisory, SupervisoryTx};

const FLUSH_AFTER_DIRTY: Duration = Duration::from_secs(2);
const CLOSE_AFTER_IDLE: Duration = Duration::from_secs(120);
const SYNCER_INTERVAL: Duration = Duration::from_secs(5);

struct FileState {
    writer: io::BufWriter<std::fs::File>,
    last_write: Instant,
    dirty: bool,
}

/// One open append-only file, serializing its own writes.
pub struct ArchiveFile {
    state: Mutex<FileState>,
}

impl ArchiveFile {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::DirBuilder::new().recursive(true).mode(0o755).create(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).mode(0o664).open(path)?;
        Ok(ArchiveFile {
            state: Mutex::new(FileState { writer: io::BufWriter::new(file), last_write: Instant::now(), dirty: false }),
        })
    }

    fn write_line(&self, raw: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.writer.write_all(raw)?;
        state.writer.write_all(b"\n")?;
        state.dirty = true;
        state.last_write = Instant::now();
        Ok(())
    }

    fn flush_if_dirty_and_stale(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.dirty && state.last_write.elapsed() > FLUSH_AFTER_DIRTY {
            state.writer.flush()?;
            state.dirty = false;
        }
        Ok(())
    }

    fn idle_longer_than(&self, threshold: Duration) -> bool {
        self.state.lock().unwrap().last_write.elapsed() > threshold
    }

    fn close(&self) -> io::Result<()> {
        self.state.lock().unwrap().writer.flush()
    }
}

/// Mapping from archive file path to its open handle. Paths have the form
/// `<log_dir>/YYYY/MM/DD/<hostname>.log`.
pub struct ArchiveWriter {
    log_dir: Option<PathBuf>,
    index: Mutex<HashMap<PathBuf, Arc<ArchiveFile>>>,
}

impl ArchiveWriter {
    /// `log_dir = None` makes `write` a no-op — the archive writer is
    /// absent, matching an empty `LOG_DIR` configuration.
    pub fn new(log_dir: Option<PathBuf>) -> Arc<ArchiveWriter> {
        Arc::new(ArchiveWriter { log_dir, index: Mutex::new(HashMap::new()) })
    }

    fn path_for(&self, log_dir: &Path, hostname: &str) -> PathBuf {
        let now = chrono::Local::now();
        log_dir
            .join(format!("{:04}", now.format("%Y")))
            .join(format!("{:02}", now.format("%m")))
            .join(format!("{:02}", now.format("%d")))
            .join(format!("{hostname}.log"))
    }

    /// Append `raw`, newline-terminated, to the file for `hostname` on the
    /// current day. I/O errors are reported on `supervisory` and the file
    /// is evicted from the index so the next write retries a fresh handle.
    pub fn write(&self, hostname: &str, raw: &[u8], supervisory: &SupervisoryTx) {
        let Some(log_dir) = self.log_dir.clone() else { return };
        let path = self.path_for(&log_dir, hostname);

        let file = {
            let mut index = self.index.lock().unwrap();
            match index.get(&path) {
                Some(f) => f.clone(),
                None => match ArchiveFile::open(&path) {
                    Ok(f) => {
                        let f = Arc::new(f);
                        index.insert(path.clone(), f.clone());
                        f
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "archive open failed");
                        let _ = supervisory.send(Supervisory::ArchiveIoError { path, reason: e.to_string() });
                        return;
                    }
                },
            }
        };

        if let Err(e) = file.write_line(raw) {
            warn!(path = %path.display(), error = %e, "archive write failed");
            let _ = supervisory.send(Supervisory::ArchiveIoError { path: path.clone(), reason: e.to_string() });
            self.index.lock().unwrap().remove(&path);
        }
    }

    /// Flush every dirty-and-stale file, then close and evict files idle
    /// longer than [`CLOSE_AFTER_IDLE`].
    pub fn sync_once(&self) {
        let snapshot: Vec<(PathBuf, Arc<ArchiveFile>)> =
            self.index.lock().unwrap().iter().map(|(p, f)| (p.clone(), f.clone())).collect();
        let mut to_evict = Vec::new();
        for (path, file) in snapshot {
            if let Err(e) = file.flush_if_dirty_and_stale() {
                warn!(path = %path.display(), error = %e, "archive flush failed");
            }
            if file.idle_longer_than(CLOSE_AFTER_IDLE) {
                let _ = file.close();
                to_evict.push(path);
            }
        }
        if !to_evict.is_empty() {
            let mut index = self.index.lock().unwrap();
            for path in to_evict {
                index.remove(&path);
            }
        }
    }

    /// Flush and close every open file, clearing the index. The next write
    /// reopens fresh handles — used both on SIGHUP (external rotation) and
    /// on shutdown.
    pub fn close_all(&self) {
        let mut index = self.index.lock().unwrap();
        for (path, file) in index.iter() {
            if let Err(e) = file.close() {
                warn!(path = %path.display(), error = %e, "archive close failed");
            }
        }
        index.clear();
    }

    pub fn open_file_count(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    /// Spawn the background syncer task, waking every 5 seconds.
    pub fn spawn_syncer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SYNCER_INTERVAL);
            loop {
                interval.tick().await;
                this.sync_once();
            }
        })
    }
}
