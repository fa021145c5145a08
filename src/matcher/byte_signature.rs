//! Byte-signature matcher.
//!
//! Scans the eagerly read prefix first. On a miss the full content is mapped
//! and scanned, unless the file exceeds `max_full_scan_bytes`, in which case
//! the candidate is reported as skipped rather than silently passed over.

use super::{Evaluation, MatchEvidence, MatchResult, PreparedRecord, Skip};
use crate::content::CandidateFile;
use crate::types::{MatchKind, Offset, SearchConfig};

pub fn evaluate(
    candidate: &CandidateFile,
    reference: &PreparedRecord,
    config: &SearchConfig,
) -> Evaluation {
    let pattern = match &reference.byte_pattern {
        Some(pattern) => pattern,
        None => return Ok(None),
    };

    let found = match pattern.find_in(&candidate.content_prefix) {
        Some(offset) => Some(offset),
        None if candidate.prefix_is_complete() => None,
        None => {
            if candidate.size_bytes > config.max_full_scan_bytes {
                return Err(Skip::TooLarge {
                    size: candidate.size_bytes,
                    limit: config.max_full_scan_bytes,
                });
            }
            let content = candidate
                .full_content()
                .map_err(|e| Skip::Unreadable(e.to_string()))?;
            pattern.find_in(content)
        }
    };

    Ok(found.map(|offset| {
        MatchResult::new(
            candidate,
            reference,
            MatchKind::ByteSignature,
            MatchEvidence::ByteOffset {
                offset: Offset::new(offset as u64),
            },
        )
    }))
}
