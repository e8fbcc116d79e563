//! The classification engine: per-tag compiled regex sets, evaluated in
//! self-optimizing frequency order, hot-reloaded on file mtime change.
//!
//! Tag names equal the rule file's basename. Each non-blank, non-`#`-prefixed
//! line is a pattern; a leading `!!`/`!` sets the rule's importance to 2/1.
//! As in the source this distills, the leading bang(s) are stripped only
//! from the text kept for display — the *compiled* pattern and the
//! fingerprint are both taken over the full original line, bangs included,
//! so existing rule files keep matching (and keep the same fingerprint)
//! after a rewrite.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use regex::bytes::Regex;
use tracing::{info, warn};

use crate::error::{Supervisory, SupervisoryTx};

const REOPTIMIZE_EVERY: u64 = 50_000;
const RELOAD_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RuleCompileError {
    #[error("{path}: line {line}: {message}")]
    BadPattern { path: PathBuf, line: usize, message: String },
    #[error("cannot read rules directory {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
    #[error("cannot read rule file {0}: {1}")]
    ReadFile(PathBuf, std::io::Error),
    #[error("cannot stat rule file {0}: {1}")]
    Stat(PathBuf, std::io::Error),
}

/// A single compiled rule.
pub struct Rule {
    pattern: Regex,
    /// Display text with the leading `!`/`!!` stripped. Not used for
    /// matching or fingerprinting — see the module doc.
    pub display_text: String,
    /// 32-hex digest of the full original line (bangs included).
    pub fingerprint: String,
    /// 0, 1, or 2, parsed from the leading bang count.
    pub importance: u8,
    match_count: AtomicU64,
}

impl Rule {
    fn compile(line: &str) -> Result<Rule, String> {
        let (display_text, importance) = if let Some(rest) = line.strip_prefix("!!") {
            (rest.to_owned(), 2)
        } else if let Some(rest) = line.strip_prefix('!') {
            (rest.to_owned(), 1)
        } else {
            (line.to_owned(), 0)
        };
        let pattern = Regex::new(line).map_err(|e| e.to_string())?;
        let fingerprint = fingerprint_of(line.as_bytes());
        Ok(Rule { pattern, display_text, fingerprint, importance, match_count: AtomicU64::new(0) })
    }

    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("display_text", &self.display_text)
            .field("fingerprint", &self.fingerprint)
            .field("importance", &self.importance)
            .field("match_count", &self.match_count())
            .finish()
    }
}

/// 32-hex-character MD5 digest, matching the original daemon's fingerprint
/// format exactly (rule text, tag, hostname, or priority name — all go
/// through this same function).
pub fn fingerprint_of(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// The all-zeros fingerprint bucket for unmatched messages.
pub const NULL_FINGERPRINT: &str = "00000000000000000000000000000000";

/// A tag's rule set: the map of fingerprint -> Rule plus an ordered sequence
/// of the same rules, kept sorted by descending match count. The two
/// collections always hold the same rules.
pub struct RuleSet {
    pub tag: String,
    entries: HashMap<String, Arc<Rule>>,
    ordered: Mutex<Vec<Arc<Rule>>>,
    checks: AtomicU64,
    pub loaded_mtime: SystemTime,
}

impl RuleSet {
    fn from_lines(tag: &str, path: &Path, loaded_mtime: SystemTime, text: &str) -> Result<RuleSet, RuleCompileError> {
        let mut entries = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = Rule::compile(line).map_err(|message| RuleCompileError::BadPattern {
                path: path.to_owned(),
                line: idx + 1,
                message,
            })?;
            entries.insert(rule.fingerprint.clone(), Arc::new(rule));
        }
        let ordered = entries.values().cloned().collect();
        Ok(RuleSet { tag: tag.to_owned(), entries, ordered: Mutex::new(ordered), checks: AtomicU64::new(0), loaded_mtime })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Re-sort the ordered sequence by descending match count. Exposed for
    /// tests; normally only called internally from [`check`](Self::check).
    pub fn optimize(&self) {
        self.ordered.lock().unwrap().sort_by(|a, b| b.match_count().cmp(&a.match_count()));
    }

    /// Evaluate `message` against this rule set in current order. Returns
    /// the first matching rule, incrementing its counter.
    pub fn check(&self, message: &[u8]) -> Option<Arc<Rule>> {
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if n % REOPTIMIZE_EVERY == 0 {
            self.optimize();
        }
        let ordered = self.ordered.lock().unwrap();
        for rule in ordered.iter() {
            if rule.pattern.is_match(message) {
                rule.match_count.fetch_add(1, Ordering::Relaxed);
                return Some(rule.clone());
            }
        }
        None
    }

    /// Snapshot of rules in current order, for tests asserting the
    /// self-optimization invariant.
    pub fn ordered_snapshot(&self) -> Vec<Arc<Rule>> {
        self.ordered.lock().unwrap().clone()
    }
}

struct TagState {
    current: RwLock<Arc<RuleSet>>,
    file_path: PathBuf,
}

/// Per-tag compiled regex sets, reloadable without downtime.
pub struct ClassificationEngine {
    tags: RwLock<HashMap<String, Arc<TagState>>>,
}

impl ClassificationEngine {
    /// Read every regular file under `rules_dir`; each file name is a tag.
    /// A compile error here is fatal — the caller should abort startup.
    pub fn load(rules_dir: &Path) -> Result<ClassificationEngine, RuleCompileError> {
        let mut tags = HashMap::new();
        let read_dir = std::fs::read_dir(rules_dir)
            .map_err(|e| RuleCompileError::ReadDir(rules_dir.to_owned(), e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| RuleCompileError::ReadDir(rules_dir.to_owned(), e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let tag = entry.file_name().to_string_lossy().into_owned();
            let ruleset = load_ruleset(&tag, &path)?;
            info!(tag = %tag, rules = ruleset.len(), "watching tag");
            tags.insert(
                tag,
                Arc::new(TagState { current: RwLock::new(Arc::new(ruleset)), file_path: path }),
            );
        }
        Ok(ClassificationEngine { tags: RwLock::new(tags) })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.read().unwrap().contains_key(tag)
    }

    /// Look up the tag's current rule set and evaluate `message` against it.
    /// The returned `Arc<RuleSet>` snapshot guarantees a reload racing this
    /// call cannot produce a hybrid match: we clone the pointer once, then
    /// operate only on that snapshot.
    pub fn check(&self, tag: &str, message: &[u8]) -> Option<Arc<Rule>> {
        let state = self.tags.read().unwrap().get(tag).cloned()?;
        let ruleset = state.current.read().unwrap().clone();
        ruleset.check(message)
    }

    /// Spawn the background hot-reload task: wakes every 10s, compares each
    /// tag's rule file mtime to the value captured at last load, and swaps
    /// in a freshly parsed `RuleSet` on change. A compile failure during
    /// reload is logged and the old `RuleSet` is retained.
    pub fn spawn_hot_reload(self: Arc<Self>, supervisory: SupervisoryTx) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RELOAD_POLL_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                self.reload_changed(&supervisory);
            }
        })
    }

    fn reload_changed(&self, supervisory: &SupervisoryTx) {
        let snapshot: Vec<(String, Arc<TagState>)> =
            self.tags.read().unwrap().iter().map(|(t, s)| (t.clone(), s.clone())).collect();
        for (tag, state) in snapshot {
            let mtime = match std::fs::metadata(&state.file_path).and_then(|m| m.modified()) {
                Ok(mtime) => mtime,
                Err(e) => {
                    let _ = supervisory.send(Supervisory::RuleReloadFailed {
                        tag: tag.clone(),
                        reason: format!("stat failed: {e}"),
                    });
                    continue;
                }
            };
            let current_mtime = state.current.read().unwrap().loaded_mtime;
            if mtime <= current_mtime {
                continue;
            }
            match load_ruleset(&tag, &state.file_path) {
                Ok(new_ruleset) => {
                    info!(tag = %tag, rules = new_ruleset.len(), "reloaded watched tag");
                    *state.current.write().unwrap() = Arc::new(new_ruleset);
                }
                Err(e) => {
                    warn!(tag = %tag, error = %e, "rule reload failed, keeping previous rule set");
                    let _ = supervisory.send(Supervisory::RuleReloadFailed { tag, reason: e.to_string() });
                }
            }
        }
    }
}

fn load_ruleset(tag: &str, path: &Path) -> Result<RuleSet, RuleCompileError> {
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| RuleCompileError::Stat(path.to_owned(), e))?;
    let text = std::fs::read_to_string(path).map_err(|e| RuleCompileError::ReadFile(path.to_owned(), e))?;
    RuleSet::from_lines(tag, path, mtime, &text)
}
