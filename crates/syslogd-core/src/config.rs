//! The populated options record the core consumes. Loading this from a file
//! or environment is the caller's job (out of scope per the daemon's own
//! design — see `services/syslogd` for the env-var-driven binary).

use std::path::PathBuf;

/// Ingest queue capacity: `128 * 1024`.
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct Options {
    /// UDP/TCP bind address, e.g. `":514"` or `"0.0.0.0:514"`.
    pub sock_addr: String,
    /// Unix datagram socket path, e.g. `/dev/log`.
    pub unix_path: PathBuf,
    /// Ingest queue capacity.
    pub buffer_size: usize,
    /// Archive root. Empty disables archiving.
    pub log_dir: Option<PathBuf>,
    /// Classification rules directory.
    pub rules_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sock_addr: ":514".to_owned(),
            unix_path: PathBuf::from("/dev/log"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            log_dir: None,
            rules_dir: PathBuf::from("/etc/gosyslogd"),
        }
    }
}
