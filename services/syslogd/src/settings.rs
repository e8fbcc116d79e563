//! Environment-variable configuration. There is deliberately no config-file
//! loader here — every recognized key is read straight from the process
//! environment, once, at startup.

use std::env;
use std::path::PathBuf;

use syslogd_core::Options;

pub struct Settings {
    pub core: Options,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub http_addr: String,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Settings {
        let mut core = Options::default();
        if let Ok(v) = env::var("SOCK_ADDR") {
            core.sock_addr = v;
        }
        if let Ok(v) = env::var("UNIX_PATH") {
            core.unix_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("BUFFER_SIZE") {
            if let Ok(n) = v.parse() {
                core.buffer_size = n;
            }
        }
        if let Ok(v) = env::var("LOG_DIR") {
            core.log_dir = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Ok(v) = env::var("RULES_DIR") {
            core.rules_dir = PathBuf::from(v);
        }

        Settings {
            core,
            redis_url: env::var("REDIS_URL").ok(),
            database_url: env::var("DATABASE_URL").ok(),
            http_addr: env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
        }
    }
}
