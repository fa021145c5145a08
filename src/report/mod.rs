//! Result aggregation and the report handed to presentation/export layers.
//!
//! Field names and types of [`Report`] are the de facto schema external
//! save/load/compare tools read, so changes here are breaking changes.

pub mod timeline;

use crate::artifact::{ArtifactCatalog, ArtifactId, ArtifactRecord, RecordRef};
use crate::matcher::{MatchResult, Skip};
use crate::types::{MatchKind, ScanStats};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use timeline::{Consistency, IssueFlag, Timeline, TimestampIssue};

/// Category of a per-file or per-record problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    PermissionDenied,
    Io,
    SkippedTooLarge,
    DecodeFailed,
    InvalidTimestamp,
    MatcherPanicked,
    SymlinkSkipped,
}

/// A non-fatal problem recorded during the search
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<RecordRef>,
}

impl Diagnostic {
    pub fn new(path: impl Into<PathBuf>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
            record_ref: None,
        }
    }

    pub fn for_record(mut self, record_ref: RecordRef) -> Self {
        self.record_ref = Some(record_ref);
        self
    }

    pub fn from_io(path: &Path, err: &std::io::Error) -> Self {
        let kind = if err.kind() == std::io::ErrorKind::PermissionDenied {
            DiagnosticKind::PermissionDenied
        } else {
            DiagnosticKind::Io
        };
        Self::new(path, kind, err.to_string())
    }

    pub fn from_skip(path: &Path, skip: &Skip) -> Self {
        match skip {
            Skip::TooLarge { size, limit } => Self::new(
                path,
                DiagnosticKind::SkippedTooLarge,
                format!("skipped: too large ({} bytes > {} byte limit)", size, limit),
            ),
            Skip::Unreadable(message) => Self::new(path, DiagnosticKind::Io, message.clone()),
            Skip::NotText => Self::new(
                path,
                DiagnosticKind::DecodeFailed,
                "content is not decodable as text",
            ),
        }
    }
}

/// Terminal state of a search that produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    Completed,
    Cancelled,
}

/// Matches of one reference record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMatches {
    pub record_ref: RecordRef,
    pub artifact_id: ArtifactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    pub source_path: PathBuf,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub matches: Vec<MatchResult>,
}

/// Final deep search report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub outcome: SearchOutcome,
    pub generated_at: DateTime<Utc>,
    pub root: PathBuf,
    pub tolerance_secs: u64,
    /// Per-record view, in record order
    pub records: Vec<RecordMatches>,
    /// Flattened view sorted by `matched_at_utc`, then `candidate_path`
    pub summary: Vec<MatchResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ScanStats,
    pub timeline: Timeline,
    /// SHA-256 over the summary
    pub checksum: String,
}

impl Report {
    pub fn matches_for(&self, record_ref: RecordRef) -> &[MatchResult] {
        self.records
            .iter()
            .find(|group| group.record_ref == record_ref)
            .map(|group| group.matches.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_matches(&self) -> usize {
        self.summary.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == SearchOutcome::Cancelled
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }

    pub fn verify_checksum(&self) -> bool {
        compute_checksum(&self.summary) == self.checksum
    }
}

/// Session context the aggregator needs to shape a report
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub outcome: SearchOutcome,
    pub root: PathBuf,
    pub tolerance_secs: u64,
    pub records: Vec<Arc<ArtifactRecord>>,
    pub catalog: ArtifactCatalog,
    pub stats: ScanStats,
}

type MatchKey = (RecordRef, PathBuf, MatchKind);

/// Collects matches and diagnostics; duplicates by
/// `(record_ref, candidate_path, match_kind)` collapse, last write wins.
#[derive(Debug, Default)]
pub struct Aggregator {
    matches: AHashMap<MatchKey, MatchResult>,
    diagnostics: Vec<Diagnostic>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: MatchResult) {
        let key = (result.record_ref, result.candidate_path.clone(), result.match_kind);
        self.matches.insert(key, result);
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend<I: IntoIterator<Item = MatchResult>>(&mut self, results: I) {
        for result in results {
            self.push(result);
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// Deduplicated matches in report order
    pub fn sorted_matches(&self) -> Vec<MatchResult> {
        let mut summary: Vec<MatchResult> = self.matches.values().cloned().collect();
        sort_summary(&mut summary);
        summary
    }

    pub fn finish(self, meta: ReportMeta) -> Report {
        let mut summary: Vec<MatchResult> = self.matches.into_values().collect();
        sort_summary(&mut summary);

        let mut diagnostics = self.diagnostics;
        diagnostics.sort();
        diagnostics.dedup();

        let records: Vec<RecordMatches> = meta
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let record_ref = RecordRef(index);
                RecordMatches {
                    record_ref,
                    artifact_id: record.artifact_id,
                    artifact_name: meta.catalog.name(record.artifact_id).map(str::to_string),
                    source_path: record.source_path.clone(),
                    timestamp_utc: record.timestamp_utc,
                    matches: summary
                        .iter()
                        .filter(|m| m.record_ref == record_ref)
                        .cloned()
                        .collect(),
                }
            })
            .collect();

        let timeline = Timeline::build(&meta.records, &meta.catalog, &summary);
        let checksum = compute_checksum(&summary);

        let mut stats = meta.stats;
        stats.matches_found = summary.len() as u64;
        stats.diagnostics = diagnostics.len() as u64;

        Report {
            outcome: meta.outcome,
            generated_at: Utc::now(),
            root: meta.root,
            tolerance_secs: meta.tolerance_secs,
            records,
            summary,
            diagnostics,
            stats,
            timeline,
            checksum,
        }
    }
}

/// Deduplicate a stream of matches and shape it into a report.
pub fn aggregate<I: IntoIterator<Item = MatchResult>>(matches: I, meta: ReportMeta) -> Report {
    let mut aggregator = Aggregator::new();
    aggregator.extend(matches);
    aggregator.finish(meta)
}

fn sort_summary(summary: &mut [MatchResult]) {
    summary.sort_by(|a, b| {
        a.matched_at_utc
            .cmp(&b.matched_at_utc)
            .then_with(|| a.candidate_path.cmp(&b.candidate_path))
            .then_with(|| a.record_ref.cmp(&b.record_ref))
            .then_with(|| a.match_kind.cmp(&b.match_kind))
    });
}

/// Calculate checksum for report integrity
pub fn compute_checksum(summary: &[MatchResult]) -> String {
    let mut hasher = Sha256::new();
    for m in summary {
        hasher.update(
            format!(
                "{}|{}|{}|{:?}|{:?}\n",
                m.record_ref.0,
                m.candidate_path.display(),
                m.match_kind,
                m.evidence,
                m.matched_at_utc.map(|t| t.timestamp_nanos_opt()),
            )
            .as_bytes(),
        );
    }
    format!("{:x}", hasher.finalize())
}
