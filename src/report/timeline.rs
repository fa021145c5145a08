//! Timeline correlation over reference records and matched files.
//!
//! Events are ordered chronologically, grouped into clusters of nearby
//! activity, and the gaps between them are classified. When a reference
//! record looks reset-related, its earliest timestamp anchors a
//! pre-reset / reset / post-reset phase split. Every event is also checked
//! for implausible years and for instants past the analysis time.

use crate::artifact::{ArtifactCatalog, ArtifactRecord, RecordRef};
use crate::matcher::MatchResult;
use ahash::AHashSet;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Consecutive events closer than this belong to one cluster
pub const CLUSTER_THRESHOLD_SECS: i64 = 3600;

/// Half-width of the reset phase around the estimated reset instant
pub const RESET_PHASE_SECS: i64 = 3600;

/// Years outside this range are implausible for an Android dump
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 2017..=2030;

/// Slack past the analysis time before an event counts as future-dated
pub const FUTURE_SLACK_SECS: i64 = 86_400;

const RESET_KEYWORDS: &[&str] = &["factory", "reset", "wipe", "setup", "boot", "recovery"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventSource {
    Reference { record_ref: RecordRef },
    Match { record_ref: RecordRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreReset,
    ResetProcess,
    PostReset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: DateTime<Utc>,
    pub path: PathBuf,
    pub label: String,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

/// Two or more events with no gap above the cluster threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    /// Indices into `Timeline::events`
    pub events: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapHint {
    ShortInterruption,
    UserInactivity,
    LongIdle,
    PoweredOff,
}

impl GapHint {
    pub fn for_duration(gap: Duration) -> Self {
        let hours = gap.num_seconds() as f64 / 3600.0;
        if hours > 24.0 {
            GapHint::PoweredOff
        } else if hours > 8.0 {
            GapHint::LongIdle
        } else if hours > 2.0 {
            GapHint::UserInactivity
        } else {
            GapHint::ShortInterruption
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_hours: f64,
    pub hint: GapHint,
}

/// An event whose distance to its predecessor is an IQR outlier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub event: usize,
    pub interval_secs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampIssue {
    UnrealisticYear,
    FutureTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFlag {
    /// Index into `Timeline::events`
    pub event: usize,
    pub issue: TimestampIssue,
}

/// How many timestamp sources were usable, and which look wrong
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consistency {
    /// Reference records plus distinct matched files
    pub total_count: usize,
    /// Sources that produced a timeline event
    pub valid_count: usize,
    pub issues: Vec<IssueFlag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub events: Vec<TimelineEvent>,
    pub clusters: Vec<Cluster>,
    pub gaps: Vec<Gap>,
    pub outliers: Vec<Outlier>,
    pub estimated_reset: Option<DateTime<Utc>>,
    pub confidence: f64,
    #[serde(default)]
    pub consistency: Consistency,
}

impl Timeline {
    pub fn build(
        records: &[Arc<ArtifactRecord>],
        catalog: &ArtifactCatalog,
        summary: &[MatchResult],
    ) -> Self {
        Self::build_at(records, catalog, summary, Utc::now())
    }

    /// Build with `now` as the analysis time for future-dated checks.
    pub fn build_at(
        records: &[Arc<ArtifactRecord>],
        catalog: &ArtifactCatalog,
        summary: &[MatchResult],
        now: DateTime<Utc>,
    ) -> Self {
        let mut events = Vec::new();

        for (index, record) in records.iter().enumerate() {
            if let Some(at) = record.timestamp_utc {
                let label = catalog
                    .name(record.artifact_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| file_label(&record.source_path));
                events.push(TimelineEvent {
                    at,
                    path: record.source_path.clone(),
                    label,
                    source: EventSource::Reference {
                        record_ref: RecordRef(index),
                    },
                    phase: None,
                });
            }
        }

        // one event per matched file
        let mut seen: AHashSet<&PathBuf> = AHashSet::new();
        for m in summary {
            if let Some(at) = m.matched_at_utc {
                if seen.insert(&m.candidate_path) {
                    events.push(TimelineEvent {
                        at,
                        path: m.candidate_path.clone(),
                        label: file_label(&m.candidate_path),
                        source: EventSource::Match {
                            record_ref: m.record_ref,
                        },
                        phase: None,
                    });
                }
            }
        }

        events.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.path.cmp(&b.path)));

        let estimated_reset = estimate_reset(records, catalog);
        if let Some(reset) = estimated_reset {
            let half = Duration::seconds(RESET_PHASE_SECS);
            for event in &mut events {
                event.phase = Some(if event.at < reset - half {
                    Phase::PreReset
                } else if event.at <= reset + half {
                    Phase::ResetProcess
                } else {
                    Phase::PostReset
                });
            }
        }

        let clusters = find_clusters(&events);
        let gaps = find_gaps(&events);
        let outliers = find_outliers(&events);
        let confidence = phase_confidence(&events);

        let matched_files: AHashSet<&PathBuf> = summary.iter().map(|m| &m.candidate_path).collect();
        let consistency = Consistency {
            total_count: records.len() + matched_files.len(),
            valid_count: events.len(),
            issues: find_issues(&events, now),
        };

        Self {
            events,
            clusters,
            gaps,
            outliers,
            estimated_reset,
            confidence,
            consistency,
        }
    }
}

fn file_label(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Earliest timestamp among reset-related reference records
fn estimate_reset(records: &[Arc<ArtifactRecord>], catalog: &ArtifactCatalog) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter(|record| {
            let mut haystack = record.source_path.to_string_lossy().to_lowercase();
            if let Some(name) = catalog.name(record.artifact_id) {
                haystack.push(' ');
                haystack.push_str(&name.to_lowercase());
            }
            RESET_KEYWORDS.iter().any(|k| haystack.contains(k))
        })
        .filter_map(|record| record.timestamp_utc)
        .min()
}

fn find_clusters(events: &[TimelineEvent]) -> Vec<Cluster> {
    let threshold = Duration::seconds(CLUSTER_THRESHOLD_SECS);
    let mut clusters = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for (index, event) in events.iter().enumerate() {
        if let Some(&last) = current.last() {
            if event.at - events[last].at > threshold {
                push_cluster(&mut clusters, events, &current);
                current.clear();
            }
        }
        current.push(index);
    }
    push_cluster(&mut clusters, events, &current);
    clusters
}

fn push_cluster(clusters: &mut Vec<Cluster>, events: &[TimelineEvent], members: &[usize]) {
    if members.len() < 2 {
        return;
    }
    clusters.push(Cluster {
        start: events[members[0]].at,
        end: events[members[members.len() - 1]].at,
        count: members.len(),
        events: members.to_vec(),
    });
}

fn find_gaps(events: &[TimelineEvent]) -> Vec<Gap> {
    let threshold = Duration::seconds(CLUSTER_THRESHOLD_SECS);
    events
        .windows(2)
        .filter_map(|pair| {
            let gap = pair[1].at - pair[0].at;
            (gap > threshold).then(|| Gap {
                start: pair[0].at,
                end: pair[1].at,
                duration_hours: gap.num_seconds() as f64 / 3600.0,
                hint: GapHint::for_duration(gap),
            })
        })
        .collect()
}

fn find_outliers(events: &[TimelineEvent]) -> Vec<Outlier> {
    if events.len() < 3 {
        return Vec::new();
    }
    let intervals: Vec<i64> = events
        .windows(2)
        .map(|pair| (pair[1].at - pair[0].at).num_seconds())
        .collect();

    let mut sorted = intervals.clone();
    sorted.sort_unstable();
    let q1 = sorted[sorted.len() / 4] as f64;
    let q3 = sorted[3 * sorted.len() / 4] as f64;
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    intervals
        .iter()
        .enumerate()
        .filter(|&(_, &interval)| (interval as f64) < lower || (interval as f64) > upper)
        .map(|(i, &interval)| Outlier {
            event: i + 1,
            interval_secs: interval,
        })
        .collect()
}

fn find_issues(events: &[TimelineEvent], now: DateTime<Utc>) -> Vec<IssueFlag> {
    let horizon = now + Duration::seconds(FUTURE_SLACK_SECS);
    let mut issues = Vec::new();
    for (index, event) in events.iter().enumerate() {
        if !PLAUSIBLE_YEARS.contains(&event.at.year()) {
            issues.push(IssueFlag {
                event: index,
                issue: TimestampIssue::UnrealisticYear,
            });
        }
        if event.at > horizon {
            issues.push(IssueFlag {
                event: index,
                issue: TimestampIssue::FutureTimestamp,
            });
        }
    }
    issues
}

fn phase_confidence(events: &[TimelineEvent]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let has = |phase: Phase| events.iter().any(|e| e.phase == Some(phase));

    let mut confidence = (events.len() as f64 * 0.1).min(0.5);
    if has(Phase::ResetProcess) {
        confidence += 0.3;
    }
    if has(Phase::PreReset) && has(Phase::PostReset) {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactId;
    use crate::matcher::MatchEvidence;
    use crate::types::MatchKind;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn matched(path: &str, when: DateTime<Utc>) -> MatchResult {
        MatchResult {
            record_ref: RecordRef(0),
            artifact_id: ArtifactId(1),
            candidate_path: PathBuf::from(path),
            match_kind: MatchKind::TimeWindow,
            evidence: MatchEvidence::TimeDelta { seconds: 0 },
            matched_at_utc: Some(when),
        }
    }

    fn bootstat_record(when: DateTime<Utc>) -> Arc<ArtifactRecord> {
        Arc::new(ArtifactRecord::new(
            ArtifactId(1),
            "/data/misc/bootstat/factory_reset",
            when,
        ))
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = Timeline::build(&[], &ArtifactCatalog::builtin(), &[]);
        assert!(timeline.events.is_empty());
        assert!(timeline.clusters.is_empty());
        assert_eq!(timeline.confidence, 0.0);
        assert_eq!(timeline.estimated_reset, None);
    }

    #[test]
    fn test_clusters_and_gaps() {
        let records = vec![bootstat_record(at(10, 0))];
        let summary = vec![
            matched("/dump/a", at(10, 2)),
            matched("/dump/b", at(10, 30)),
            matched("/dump/c", at(15, 0)),
        ];
        let timeline = Timeline::build(&records, &ArtifactCatalog::builtin(), &summary);

        assert_eq!(timeline.events.len(), 4);
        assert_eq!(timeline.clusters.len(), 1);
        assert_eq!(timeline.clusters[0].count, 3);
        assert_eq!(timeline.gaps.len(), 1);
        assert_eq!(timeline.gaps[0].hint, GapHint::UserInactivity);
    }

    #[test]
    fn test_one_event_per_matched_file() {
        let summary = vec![matched("/dump/a", at(1, 0)), matched("/dump/a", at(1, 0))];
        let timeline = Timeline::build(&[], &ArtifactCatalog::new(), &summary);
        assert_eq!(timeline.events.len(), 1);
        assert_eq!(timeline.events[0].label, "a");
    }

    #[test]
    fn test_reset_phases() {
        let records = vec![bootstat_record(at(12, 0))];
        let summary = vec![
            matched("/dump/before", at(8, 0)),
            matched("/dump/during", at(12, 30)),
            matched("/dump/after", at(20, 0)),
        ];
        let timeline = Timeline::build(&records, &ArtifactCatalog::builtin(), &summary);

        assert_eq!(timeline.estimated_reset, Some(at(12, 0)));
        let phases: Vec<Option<Phase>> = timeline.events.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                Some(Phase::PreReset),
                Some(Phase::ResetProcess),
                Some(Phase::ResetProcess),
                Some(Phase::PostReset),
            ]
        );
        assert!((timeline.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_detection() {
        let summary = vec![
            matched("/dump/1", at(0, 0)),
            matched("/dump/2", at(0, 1)),
            matched("/dump/3", at(0, 2)),
            matched("/dump/4", at(0, 3)),
            matched("/dump/5", at(0, 4)),
            matched("/dump/6", at(23, 0)),
        ];
        let timeline = Timeline::build(&[], &ArtifactCatalog::new(), &summary);
        assert_eq!(timeline.outliers.len(), 1);
        assert_eq!(timeline.outliers[0].event, 5);
    }

    #[test]
    fn test_consistency_counts_and_flags() {
        let now = at(12, 0);
        let records = vec![
            bootstat_record(at(10, 0)),
            Arc::new(ArtifactRecord::without_timestamp(ArtifactId(2), "/cache/recovery/last_log")),
        ];
        let summary = vec![
            matched("/dump/old", Utc.with_ymd_and_hms(2009, 6, 1, 0, 0, 0).unwrap()),
            matched("/dump/ahead", now + Duration::days(3)),
            matched("/dump/tomorrow", now + Duration::hours(20)),
        ];
        let timeline = Timeline::build_at(&records, &ArtifactCatalog::builtin(), &summary, now);
        let consistency = &timeline.consistency;

        assert_eq!(consistency.total_count, 5);
        assert_eq!(consistency.valid_count, 4);
        assert_eq!(
            consistency.issues,
            vec![
                IssueFlag {
                    event: 0,
                    issue: TimestampIssue::UnrealisticYear,
                },
                IssueFlag {
                    event: 3,
                    issue: TimestampIssue::FutureTimestamp,
                },
            ]
        );
        assert_eq!(timeline.events[0].path, PathBuf::from("/dump/old"));
        assert_eq!(timeline.events[3].path, PathBuf::from("/dump/ahead"));
    }

    #[test]
    fn test_far_future_is_flagged_twice() {
        let summary = vec![matched("/dump/x", Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap())];
        let timeline = Timeline::build(&[], &ArtifactCatalog::new(), &summary);
        let issues: Vec<TimestampIssue> =
            timeline.consistency.issues.iter().map(|flag| flag.issue).collect();
        assert_eq!(
            issues,
            vec![TimestampIssue::UnrealisticYear, TimestampIssue::FutureTimestamp]
        );
    }

    #[test]
    fn test_gap_hints() {
        assert_eq!(GapHint::for_duration(Duration::minutes(90)), GapHint::ShortInterruption);
        assert_eq!(GapHint::for_duration(Duration::hours(5)), GapHint::UserInactivity);
        assert_eq!(GapHint::for_duration(Duration::hours(12)), GapHint::LongIdle);
        assert_eq!(GapHint::for_duration(Duration::hours(30)), GapHint::PoweredOff);
    }
}
