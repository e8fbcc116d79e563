//! Syslog wire format: decoding a raw RFC3164-ish packet into a [`Message`].
//!
//! The grammar is `<PRI>TIMESTAMP HEADER: PAYLOAD`, where `PRI` is 1-3 ASCII
//! digits, `TIMESTAMP` is either the traditional 15-character form
//! (`Mmm dd HH:MM:SS`) or a 25-character ISO-8601-with-offset form, `HEADER`
//! is `HOSTNAME TAG[PID]` / `HOSTNAME TAG` / `TAG[PID]` / `TAG`, and `PAYLOAD`
//! is the remainder of the line.
//!
//! Parsing operates on raw bytes, not `&str` — syslog payloads are not
//! guaranteed to be valid UTF-8, and the wire grammar itself only ever
//! inspects ASCII structure (the `<PRI>` marker, the timestamp width, a
//! single `: ` separator).

use std::sync::OnceLock;

use regex::bytes::Regex;

/// Severity names indexed by `priority & 7`.
const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// Facility names indexed by `priority >> 3`. The four `unknown` slots match
/// the original table's gap between `ftp` and `local0`.
const FACILITIES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "unknown", "unknown", "unknown", "unknown", "local0", "local1", "local2", "local3",
    "local4", "local5", "local6", "local7",
];

fn wire_grammar() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^<([0-9]{1,3})>(.{15}|.{25}) (.*?): (.*)$")
            .expect("wire grammar regex is a constant")
    })
}

/// A decoded syslog message. `parse` leaves `received_epoch_millis` at `0`;
/// the ingest path stamps it with the arrival time before the message is
/// enqueued and shared, after which the whole struct is treated as frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Assigned on arrival at the listener, not parsed from the wire.
    pub received_epoch_millis: i64,
    /// The raw 0-191 priority value; `severity()`/`facility()` derive from it.
    pub priority: u8,
    pub hostname: String,
    pub tag: String,
    /// 0 if the wire header carried no `[pid]`.
    pub pid: u32,
    /// The substring after the first `>`, whitespace-trimmed. The canonical
    /// form stored in the archive and re-emitted to sinks.
    pub raw: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet does not match the syslog wire grammar ({0} capture groups, want 5)")]
    GrammarMismatch(usize),
    #[error("priority {0} out of range 0..=191")]
    PriorityOutOfRange(u32),
    #[error("priority field is not a valid integer")]
    InvalidPriority,
    #[error("packet is not valid UTF-8 in the header/hostname/tag region")]
    InvalidUtf8,
}

impl Message {
    pub fn severity(&self) -> &'static str {
        SEVERITIES[(self.priority & 7) as usize]
    }

    pub fn facility(&self) -> &'static str {
        FACILITIES[(self.priority >> 3) as usize]
    }

    /// `"<facility>.<severity>"`, e.g. `"daemon.err"`.
    pub fn priority_string(&self) -> String {
        format!("{}.{}", self.facility(), self.severity())
    }
}

/// Parse a raw packet into a [`Message`].
///
/// `n` is the explicit frame length; `0` means "use the whole slice" (the
/// convention the UDP/unix-datagram listeners use, since a `recv_from` length
/// is always known but a TCP line read already has `n == buf.len()`).
/// `own_hostname` is the daemon's own hostname, resolved once at startup and
/// threaded through so this function stays pure and thread-safe.
pub fn parse(packet: &[u8], n: usize, own_hostname: &str) -> Result<Message, ParseError> {
    let slice = if n == 0 { packet } else { &packet[..n.min(packet.len())] };

    let caps = wire_grammar()
        .captures(slice)
        .ok_or(ParseError::GrammarMismatch(0))?;
    if caps.len() != 5 {
        return Err(ParseError::GrammarMismatch(caps.len()));
    }

    let pri_bytes = caps.get(1).expect("group 1 always present on match").as_bytes();
    let pri_str = std::str::from_utf8(pri_bytes).map_err(|_| ParseError::InvalidPriority)?;
    let priority: u32 = pri_str.parse().map_err(|_| ParseError::InvalidPriority)?;
    if priority > 191 {
        return Err(ParseError::PriorityOutOfRange(priority));
    }
    let priority = priority as u8;

    // group 2 is the timestamp; the wire grammar only constrains its width,
    // its contents are not otherwise interpreted.
    let header = caps.get(3).expect("group 3 always present on match").as_bytes();
    let header = std::str::from_utf8(header).map_err(|_| ParseError::InvalidUtf8)?;

    let (hostname, tagpid) = match header.split_once(' ') {
        Some((h, rest)) => (h.to_owned(), rest),
        None => (own_hostname.to_owned(), header),
    };

    let (tag, pid) = match tagpid.find('[') {
        Some(open) if open > 0 => {
            let close = tagpid.rfind(']').unwrap_or(tagpid.len());
            let pid_str = &tagpid[open + 1..close.max(open + 1)];
            let pid = pid_str.parse().unwrap_or(0);
            (tagpid[..open].to_owned(), pid)
        }
        _ => (tagpid.to_owned(), 0),
    };

    let raw = match slice.iter().position(|&b| b == b'>') {
        Some(gt) => trim_ascii_whitespace(&slice[gt + 1..]),
        None => trim_ascii_whitespace(slice),
    };

    Ok(Message {
        received_epoch_millis: 0,
        priority,
        hostname,
        tag,
        pid,
        raw,
    })
}

fn trim_ascii_whitespace(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    bytes[start..end].to_vec()
}
