//! Workspace root. Carries no runtime code of its own — it exists so
//! `tests/integration/*.rs` can exercise `syslogd-core`, `syslogd-protocol`,
//! and the `syslogd` binary crate together, the way the rest of the daemon
//! never does internally.
