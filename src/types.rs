use crate::error::{DeepScanError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Newtype wrapper for byte offsets inside a candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl Offset {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Newtype wrapper for sizes in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub u64);

impl Size {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// The closed set of matching strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ByteSignature,
    TimeWindow,
    TextPattern,
}

impl MatchKind {
    /// All kinds, cheapest first.
    pub const ALL: [MatchKind; 3] = [
        MatchKind::TimeWindow,
        MatchKind::ByteSignature,
        MatchKind::TextPattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::ByteSignature => "byte_signature",
            MatchKind::TimeWindow => "time_window",
            MatchKind::TextPattern => "text_pattern",
        }
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MatchKind {
    type Err = DeepScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "byte_signature" | "byte" | "hex" => Ok(MatchKind::ByteSignature),
            "time_window" | "time" | "mtime" => Ok(MatchKind::TimeWindow),
            "text_pattern" | "text" => Ok(MatchKind::TextPattern),
            other => Err(DeepScanError::InvalidArgument(format!(
                "unknown matcher '{}'",
                other
            ))),
        }
    }
}

/// Deep search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum |mtime - reference| for a time-window match, in seconds
    pub tolerance_secs: u64,

    /// Enabled matcher set
    pub enabled_matchers: Vec<MatchKind>,

    /// Files above this size never get a full-content scan
    pub max_full_scan_bytes: u64,

    /// Bytes read eagerly from every candidate
    pub prefix_len: usize,

    /// Bytes of a candidate decoded for text matching
    pub text_window_bytes: usize,

    /// Worker count (0 = available parallelism)
    pub concurrency: usize,

    /// Globs relative to the root; empty means everything
    pub include_globs: Vec<String>,

    /// Globs relative to the root that are never scanned
    pub exclude_globs: Vec<String>,

    /// Offsets inside a byte fragment treated as don't-care
    pub byte_wildcards: Vec<usize>,

    pub text_case_sensitive: bool,

    /// Treat text fragments as regular expressions instead of literals
    pub text_is_regex: bool,

    /// Records with no byte fragment search for the little-endian u32 epoch
    /// of their timestamp instead
    pub derive_epoch_fragment: bool,

    /// Capacity of the progress channel; events beyond it are dropped
    pub progress_capacity: usize,

    /// Walker entries between cancellation checks
    pub cancel_check_interval: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 300,
            enabled_matchers: MatchKind::ALL.to_vec(),
            max_full_scan_bytes: 64 * 1024 * 1024,
            prefix_len: 64 * 1024,
            text_window_bytes: 1024 * 1024,
            concurrency: 0,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            byte_wildcards: Vec::new(),
            text_case_sensitive: false,
            text_is_regex: false,
            derive_epoch_fragment: false,
            progress_capacity: 1024,
            cancel_check_interval: 64,
        }
    }
}

impl SearchConfig {
    /// Saturates at `Duration::MAX` for tolerances chrono cannot represent
    pub fn tolerance(&self) -> chrono::Duration {
        i64::try_from(self.tolerance_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn is_enabled(&self, kind: MatchKind) -> bool {
        self.enabled_matchers.contains(&kind)
    }

    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled_matchers.is_empty() {
            return Err(DeepScanError::Config(
                "at least one matcher must be enabled".to_string(),
            ));
        }
        if self.prefix_len == 0 {
            return Err(DeepScanError::Config("prefix_len must be greater than 0".to_string()));
        }
        if self.text_window_bytes == 0 {
            return Err(DeepScanError::Config(
                "text_window_bytes must be greater than 0".to_string(),
            ));
        }
        if self.prefix_len as u64 > self.max_full_scan_bytes {
            return Err(DeepScanError::Config(format!(
                "prefix_len ({}) cannot exceed max_full_scan_bytes ({})",
                self.prefix_len, self.max_full_scan_bytes
            )));
        }
        Ok(())
    }
}

/// Progress update sent to an external observer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanProgress {
    /// A candidate finished evaluation
    Scanned {
        scanned_count: u64,
        matched_count: u64,
        current_path: PathBuf,
    },
    /// The search reached a terminal state
    Finished {
        scanned_count: u64,
        matched_count: u64,
        cancelled: bool,
    },
}

/// Scan statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub bytes_read: u64,
    pub matches_found: u64,
    pub diagnostics: u64,
    pub duration_secs: f64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throughput_mbps(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.bytes_read as f64 / (1024.0 * 1024.0) / self.duration_secs
        } else {
            0.0
        }
    }
}
