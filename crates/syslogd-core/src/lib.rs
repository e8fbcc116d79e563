//! Core engine of the syslog collection daemon: archive writer, ingest
//! server, classification engine, ring cache with fan-out, and the
//! dispatcher loop that wires them together.
//!
//! This crate knows nothing about HTTP, Redis, or Postgres — sinks are
//! injected as trait objects (see [`sinks`]) so the binary crate can wire up
//! real backends while this crate and its tests stay hermetic.

pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ingest;
pub mod ring;
pub mod rules;
pub mod sinks;
pub mod stats;

pub use archive::ArchiveWriter;
pub use config::Options;
pub use dispatcher::Dispatcher;
pub use error::{Supervisory, SupervisoryRx, SupervisoryTx};
pub use ingest::{Consumer, Ingest};
pub use ring::RingCache;
pub use rules::ClassificationEngine;
pub use stats::{ActiveNodes, Counters};
