//! Modification-time window matcher. No I/O; always run first.

use super::{MatchEvidence, MatchResult, PreparedRecord};
use crate::content::CandidateFile;
use crate::time;
use crate::types::{MatchKind, SearchConfig};

pub fn evaluate(
    candidate: &CandidateFile,
    reference: &PreparedRecord,
    config: &SearchConfig,
) -> Option<MatchResult> {
    let reference_time = reference.record.timestamp_utc?;
    let mtime = candidate.mtime_utc?;

    if !time::within_tolerance(reference_time, mtime, config.tolerance()) {
        return None;
    }

    Some(MatchResult::new(
        candidate,
        reference,
        MatchKind::TimeWindow,
        MatchEvidence::TimeDelta {
            seconds: time::delta(reference_time, mtime).num_seconds(),
        },
    ))
}
