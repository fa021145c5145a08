//! Deep search correlation engine for Android factory-reset analysis.
//!
//! Given reference records pulled from known artifacts (bootstat,
//! recovery logs, settings stores, ...), walks an extracted filesystem dump
//! and reports every file that relates to a record:
//! - TimeWindow: mtime within a tolerance of the record's UTC timestamp
//! - ByteSignature: SIMD-accelerated search for the record's byte fragment
//! - TextPattern: literal or regex match over a lossy text window
//! - Parallel evaluation on a rayon pool with panic isolation per file
//! - Progress streaming via tokio::sync::mpsc, cooperative cancellation
//! - Deduplicated, deterministically ordered report with a timeline view

pub mod artifact;
pub mod cli;
pub mod content;
pub mod entropy;
pub mod error;
pub mod matcher;
pub mod report;
pub mod scanner;
pub mod simd_search;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use artifact::{ArtifactCatalog, ArtifactId, ArtifactRecord, RecordRef};
pub use content::CandidateFile;
pub use error::{DeepScanError, Result};
pub use matcher::{MatchEvidence, MatchResult, PreparedRecord};
pub use report::{aggregate, Aggregator, Diagnostic, DiagnosticKind, Report, SearchOutcome, Timeline};
pub use scanner::{CancelHandle, DeepSearch, SearchHandle, SearchState, Walker};
pub use simd_search::{find_pattern_simd, BytePattern};
pub use types::{MatchKind, Offset, ScanProgress, ScanStats, SearchConfig, Size};
