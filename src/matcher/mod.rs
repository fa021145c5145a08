pub mod byte_signature;
pub mod text_pattern;
pub mod time_window;

use crate::artifact::{ArtifactId, ArtifactRecord, RecordRef};
use crate::content::CandidateFile;
use crate::error::Result;
use crate::simd_search::BytePattern;
use crate::types::{MatchKind, Offset, SearchConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub use text_pattern::TextNeedle;

/// Matched text stored in evidence is cut to this many characters
pub const MAX_EXCERPT_CHARS: usize = 256;

/// What a matcher found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvidence {
    /// First occurrence of the byte fragment
    ByteOffset { offset: Offset },
    /// Signed seconds from the reference timestamp to the candidate mtime
    TimeDelta { seconds: i64 },
    /// First text match and the matched text
    TextOffset { offset: Offset, matched: String },
}

/// One (reference record, candidate file, match kind) finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub record_ref: RecordRef,
    pub artifact_id: ArtifactId,
    pub candidate_path: PathBuf,
    pub match_kind: MatchKind,
    pub evidence: MatchEvidence,
    /// The candidate's own mtime
    pub matched_at_utc: Option<DateTime<Utc>>,
}

impl MatchResult {
    fn new(
        candidate: &CandidateFile,
        reference: &PreparedRecord,
        match_kind: MatchKind,
        evidence: MatchEvidence,
    ) -> Self {
        Self {
            record_ref: reference.index,
            artifact_id: reference.record.artifact_id,
            candidate_path: candidate.path.clone(),
            match_kind,
            evidence,
            matched_at_utc: candidate.mtime_utc,
        }
    }

    /// Deduplication key
    pub fn key(&self) -> (RecordRef, &PathBuf, MatchKind) {
        (self.record_ref, &self.candidate_path, self.match_kind)
    }

    pub fn offset(&self) -> Option<Offset> {
        match &self.evidence {
            MatchEvidence::ByteOffset { offset } | MatchEvidence::TextOffset { offset, .. } => {
                Some(*offset)
            }
            MatchEvidence::TimeDelta { .. } => None,
        }
    }

    pub fn time_delta_secs(&self) -> Option<i64> {
        match &self.evidence {
            MatchEvidence::TimeDelta { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

/// Why a content matcher could not evaluate a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    TooLarge { size: u64, limit: u64 },
    Unreadable(String),
    NotText,
}

/// Outcome of one matcher on one (candidate, reference) pair
pub type Evaluation = std::result::Result<Option<MatchResult>, Skip>;

/// A reference record with its search needles compiled once per session
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    pub index: RecordRef,
    pub record: Arc<ArtifactRecord>,
    pub byte_pattern: Option<BytePattern>,
    pub text_needle: Option<TextNeedle>,
}

impl PreparedRecord {
    /// Fails only on an invalid text regex.
    pub fn prepare(index: RecordRef, record: Arc<ArtifactRecord>, config: &SearchConfig) -> Result<Self> {
        let byte_pattern = if !record.byte_fragment.is_empty() {
            Some(BytePattern::with_wildcards(
                &record.byte_fragment,
                &config.byte_wildcards,
            ))
        } else if config.derive_epoch_fragment {
            record
                .timestamp_utc
                .and_then(epoch_fragment)
                .map(|bytes| BytePattern::exact(&bytes))
        } else {
            None
        };

        let text_needle = if record.text_fragment.is_empty() {
            None
        } else {
            Some(TextNeedle::compile(
                &record.text_fragment,
                config.text_is_regex,
                config.text_case_sensitive,
            )?)
        };

        Ok(Self {
            index,
            record,
            byte_pattern,
            text_needle,
        })
    }

    /// True when a content matcher has something to look for
    pub fn has_content_needles(&self) -> bool {
        self.byte_pattern.is_some() || self.text_needle.is_some()
    }
}

/// Little-endian u32 seconds, the layout binary Android stores use for
/// epoch fields. `None` past 2106.
pub fn epoch_fragment(at: DateTime<Utc>) -> Option<[u8; 4]> {
    u32::try_from(at.timestamp()).ok().map(u32::to_le_bytes)
}

/// Run one matcher, selected by tag.
pub fn evaluate(
    kind: MatchKind,
    candidate: &CandidateFile,
    reference: &PreparedRecord,
    config: &SearchConfig,
) -> Evaluation {
    match kind {
        MatchKind::TimeWindow => Ok(time_window::evaluate(candidate, reference, config)),
        MatchKind::ByteSignature => byte_signature::evaluate(candidate, reference, config),
        MatchKind::TextPattern => text_pattern::evaluate(candidate, reference, config),
    }
}
