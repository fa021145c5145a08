use crate::artifact::{ArtifactCatalog, ArtifactRecord, RecordRef};
use crate::content::CandidateFile;
use crate::error::{DeepScanError, Result};
use crate::matcher::{self, time_window, MatchResult, PreparedRecord};
use crate::report::{Aggregator, Diagnostic, DiagnosticKind, Report, ReportMeta, SearchOutcome};
use crate::scanner::walker::{WalkItem, Walker};
use crate::types::{MatchKind, ScanProgress, ScanStats, SearchConfig};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, info, warn};

/// Lifecycle of one search session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SearchState {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl SearchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SearchState::Running,
            2 => SearchState::Completed,
            3 => SearchState::Cancelled,
            4 => SearchState::Failed,
            _ => SearchState::Idle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchState::Completed | SearchState::Cancelled | SearchState::Failed
        )
    }
}

/// Cooperative cancellation signal shared by the walker and the workers
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Findings for one walk item, returned by a worker to the collector
#[derive(Debug, Default)]
struct CandidateOutcome {
    matches: Vec<MatchResult>,
    diagnostics: Vec<Diagnostic>,
}

impl CandidateOutcome {
    fn is_empty(&self) -> bool {
        self.matches.is_empty() && self.diagnostics.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    scanned: AtomicU64,
    matched: AtomicU64,
    bytes: AtomicU64,
}

/// Deep search session: correlates reference records against every file
/// under a root.
///
/// Each session owns its records, config and state; nothing is shared
/// between sessions.
pub struct DeepSearch {
    config: SearchConfig,
    records: Vec<Arc<ArtifactRecord>>,
    catalog: ArtifactCatalog,
    state: Arc<AtomicU8>,
    cancel: CancelHandle,
    progress: Option<Sender<ScanProgress>>,
}

impl DeepSearch {
    pub fn new(records: Vec<ArtifactRecord>, config: SearchConfig) -> Self {
        Self {
            config,
            records: records.into_iter().map(Arc::new).collect(),
            catalog: ArtifactCatalog::builtin(),
            state: Arc::new(AtomicU8::new(SearchState::Idle as u8)),
            cancel: CancelHandle::default(),
            progress: None,
        }
    }

    pub fn with_catalog(mut self, catalog: ArtifactCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Events are sent with `try_send`; a full channel drops them.
    pub fn with_progress(mut self, sender: Sender<ScanProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Progress channel sized by `progress_capacity`; replaces any earlier
    /// sender.
    pub fn subscribe(&mut self) -> Receiver<ScanProgress> {
        let (sender, receiver) = tokio::sync::mpsc::channel(self.config.progress_capacity.max(1));
        self.progress = Some(sender);
        receiver
    }

    pub fn state(&self) -> SearchState {
        SearchState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run on a background thread.
    pub fn start(self, root: impl Into<PathBuf>) -> Result<SearchHandle> {
        let root = root.into();
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        let thread = std::thread::Builder::new()
            .name("deepscan-search".to_string())
            .spawn(move || self.run(&root))
            .map_err(|e| DeepScanError::WorkerPool(e.to_string()))?;
        Ok(SearchHandle {
            cancel,
            state,
            thread,
        })
    }

    /// Run to a terminal state on the calling thread.
    ///
    /// Returns a report for `Completed` and `Cancelled`; an error only when
    /// the session cannot start (bad config, unreadable root).
    pub fn run(&self, root: &Path) -> Result<Report> {
        self.state
            .compare_exchange(
                SearchState::Idle as u8,
                SearchState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| {
                DeepScanError::InvalidArgument(format!(
                    "search already started (state {:?})",
                    SearchState::from_u8(current)
                ))
            })?;

        info!(
            "Deep search started: root={} records={} tolerance={}s",
            root.display(),
            self.records.len(),
            self.config.tolerance_secs
        );

        match self.execute(root) {
            Ok(report) => {
                let state = if report.is_cancelled() {
                    SearchState::Cancelled
                } else {
                    SearchState::Completed
                };
                self.state.store(state as u8, Ordering::Release);
                info!(
                    "Deep search {:?}: {} files, {} matches, {} diagnostics in {:.2}s",
                    state,
                    report.stats.files_scanned,
                    report.stats.matches_found,
                    report.stats.diagnostics,
                    report.stats.duration_secs
                );
                Ok(report)
            }
            Err(e) => {
                self.state.store(SearchState::Failed as u8, Ordering::Release);
                warn!("Deep search failed: {}", e);
                Err(e)
            }
        }
    }

    fn execute(&self, root: &Path) -> Result<Report> {
        self.config.validate()?;
        let start_time = Instant::now();

        let mut aggregator = Aggregator::new();
        let prepared = self.prepare(&mut aggregator)?;
        let walker = Walker::new(root, &self.config, self.cancel.flag())?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .thread_name(|i| format!("deepscan-worker-{}", i))
            .build()
            .map_err(|e| DeepScanError::WorkerPool(e.to_string()))?;

        // only findings reach the collector; clean files are dropped in the worker
        let counters = Counters::default();
        let outcomes: Vec<CandidateOutcome> = pool.install(|| {
            walker
                .walk()
                .par_bridge()
                .map(|item| self.process(item, &prepared, &counters))
                .filter(|outcome| !outcome.is_empty())
                .collect()
        });

        for outcome in outcomes {
            aggregator.extend(outcome.matches);
            for diagnostic in outcome.diagnostics {
                aggregator.push_diagnostic(diagnostic);
            }
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            info!("Deep search cancelled; keeping {} collected matches", aggregator.len());
        }

        let stats = ScanStats {
            files_scanned: counters.scanned.load(Ordering::Relaxed),
            bytes_read: counters.bytes.load(Ordering::Relaxed),
            duration_secs: start_time.elapsed().as_secs_f64(),
            ..ScanStats::default()
        };

        let report = aggregator.finish(ReportMeta {
            outcome: if cancelled {
                SearchOutcome::Cancelled
            } else {
                SearchOutcome::Completed
            },
            root: root.to_path_buf(),
            tolerance_secs: self.config.tolerance_secs,
            records: self.records.clone(),
            catalog: self.catalog.clone(),
            stats,
        });

        self.send(ScanProgress::Finished {
            scanned_count: report.stats.files_scanned,
            matched_count: report.stats.matches_found,
            cancelled,
        });
        Ok(report)
    }

    /// Compile needles once; records without a usable timestamp are still
    /// searched by content.
    fn prepare(&self, aggregator: &mut Aggregator) -> Result<Vec<PreparedRecord>> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let record_ref = RecordRef(index);
                if record.timestamp_utc.is_none() {
                    aggregator.push_diagnostic(
                        Diagnostic::new(
                            &record.source_path,
                            DiagnosticKind::InvalidTimestamp,
                            "reference timestamp unavailable; time-window matching skipped",
                        )
                        .for_record(record_ref),
                    );
                }
                PreparedRecord::prepare(record_ref, Arc::clone(record), &self.config).map_err(|e| {
                    DeepScanError::Config(format!("{}: {}", record_ref, e))
                })
            })
            .collect()
    }

    fn process(&self, item: WalkItem, prepared: &[PreparedRecord], counters: &Counters) -> CandidateOutcome {
        let candidate = match item {
            WalkItem::Diagnostic(diagnostic) => {
                return CandidateOutcome {
                    matches: Vec::new(),
                    diagnostics: vec![diagnostic],
                }
            }
            WalkItem::Candidate(candidate) => candidate,
        };

        // pulled from the walk but not yet evaluated
        if self.cancel.is_cancelled() {
            return CandidateOutcome::default();
        }

        let outcome = isolate_panics(&candidate.path, || {
            evaluate_candidate(&candidate, prepared, &self.config)
        });

        for diagnostic in &outcome.diagnostics {
            debug!("{}: {:?} {}", diagnostic.path.display(), diagnostic.kind, diagnostic.message);
        }

        let scanned = counters.scanned.fetch_add(1, Ordering::Relaxed) + 1;
        counters
            .bytes
            .fetch_add(candidate.bytes_examined(), Ordering::Relaxed);
        let matched = counters
            .matched
            .fetch_add(outcome.matches.len() as u64, Ordering::Relaxed)
            + outcome.matches.len() as u64;

        self.send(ScanProgress::Scanned {
            scanned_count: scanned,
            matched_count: matched,
            current_path: candidate.path.clone(),
        });
        outcome
    }

    fn send(&self, event: ScanProgress) {
        if let Some(sender) = &self.progress {
            // a slow observer loses events instead of stalling workers
            let _ = sender.try_send(event);
        }
    }
}

/// Run one candidate's evaluation; a panic becomes a `MatcherPanicked`
/// diagnostic for that candidate and the search goes on.
fn isolate_panics<F>(path: &Path, evaluate: F) -> CandidateOutcome
where
    F: FnOnce() -> CandidateOutcome,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(evaluate)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "matcher panicked".to_string());
            warn!("Matcher panicked on {}: {}", path.display(), message);
            CandidateOutcome {
                matches: Vec::new(),
                diagnostics: vec![Diagnostic::new(path, DiagnosticKind::MatcherPanicked, message)],
            }
        }
    }
}

/// Cross one candidate with every prepared record.
fn evaluate_candidate(
    candidate: &CandidateFile,
    prepared: &[PreparedRecord],
    config: &SearchConfig,
) -> CandidateOutcome {
    let mut outcome = CandidateOutcome::default();

    for reference in prepared {
        let time_hit = if config.is_enabled(MatchKind::TimeWindow) {
            time_window::evaluate(candidate, reference, config)
        } else {
            None
        };
        if time_hit.is_none() && !reference.has_content_needles() {
            continue;
        }
        outcome.matches.extend(time_hit);

        for kind in [MatchKind::ByteSignature, MatchKind::TextPattern] {
            if !config.is_enabled(kind) {
                continue;
            }
            match matcher::evaluate(kind, candidate, reference, config) {
                Ok(Some(found)) => outcome.matches.push(found),
                Ok(None) => {}
                Err(skip) => {
                    let diagnostic = Diagnostic::from_skip(&candidate.path, &skip);
                    if !outcome.diagnostics.contains(&diagnostic) {
                        outcome.diagnostics.push(diagnostic);
                    }
                }
            }
        }
    }
    outcome
}

/// Handle to a search running on a background thread
pub struct SearchHandle {
    cancel: CancelHandle,
    state: Arc<AtomicU8>,
    thread: JoinHandle<Result<Report>>,
}

impl SearchHandle {
    pub fn state(&self) -> SearchState {
        SearchState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Signal cancellation and wait until in-flight work drains.
    pub fn cancel_and_wait(self) -> Result<Report> {
        self.cancel.cancel();
        self.join()
    }

    pub fn join(self) -> Result<Report> {
        self.thread
            .join()
            .map_err(|_| DeepScanError::WorkerPool("search thread panicked".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactId;
    use crate::types::Offset;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn reference_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn candidate(mtime: DateTime<Utc>, content: Vec<u8>) -> CandidateFile {
        CandidateFile::from_bytes("/dump/data/system/x.bin", Some(mtime), content, 4096)
    }

    fn prepared(record: ArtifactRecord, config: &SearchConfig) -> Vec<PreparedRecord> {
        vec![PreparedRecord::prepare(RecordRef(0), Arc::new(record), config).unwrap()]
    }

    #[test]
    fn test_time_and_byte_both_reported() {
        let config = SearchConfig::default();
        let record = ArtifactRecord::new(ArtifactId(1), "/data/misc/bootstat/x", reference_time())
            .with_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let mut content = vec![0u8; 256];
        content[128..132].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let outcome = evaluate_candidate(
            &candidate(reference_time() + Duration::seconds(120), content),
            &prepared(record, &config),
            &config,
        );
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[0].time_delta_secs(), Some(120));
        assert_eq!(outcome.matches[1].offset(), Some(Offset::new(128)));
    }

    #[test]
    fn test_time_only_record_rejected_outside_window() {
        let config = SearchConfig::default();
        let record = ArtifactRecord::new(ArtifactId(1), "/data/misc/bootstat/x", reference_time());
        let outcome = evaluate_candidate(
            &candidate(reference_time() + Duration::seconds(600), vec![0u8; 64]),
            &prepared(record, &config),
            &config,
        );
        assert!(outcome.matches.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_disabled_matchers_do_not_run() {
        let config = SearchConfig {
            enabled_matchers: vec![MatchKind::ByteSignature],
            ..Default::default()
        };
        let record = ArtifactRecord::new(ArtifactId(1), "x", reference_time()).with_bytes(vec![0xAA]);
        let outcome = evaluate_candidate(
            &candidate(reference_time(), vec![0u8; 64]),
            &prepared(record, &config),
            &config,
        );
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn test_skip_diagnostic_reported_once_per_candidate() {
        let config = SearchConfig {
            prefix_len: 16,
            max_full_scan_bytes: 32,
            ..Default::default()
        };
        let records: Vec<PreparedRecord> = (0..3)
            .map(|i| {
                let record = ArtifactRecord::new(ArtifactId(1), "x", reference_time())
                    .with_bytes(vec![0xAA, 0xBB]);
                PreparedRecord::prepare(RecordRef(i), Arc::new(record), &config).unwrap()
            })
            .collect();
        let big = CandidateFile::from_bytes("/dump/big", None, vec![0u8; 128], 16);
        let outcome = evaluate_candidate(&big, &records, &config);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::SkippedTooLarge);
    }

    #[test]
    fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let search = DeepSearch::new(Vec::new(), SearchConfig::default());
        assert_eq!(search.state(), SearchState::Idle);
        let report = search.run(dir.path()).unwrap();
        assert_eq!(search.state(), SearchState::Completed);
        assert_eq!(report.outcome, SearchOutcome::Completed);
        assert_eq!(report.stats.files_scanned, 1);

        // a session runs once
        assert!(matches!(
            search.run(dir.path()),
            Err(DeepScanError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let search = DeepSearch::new(Vec::new(), SearchConfig::default());
        let result = search.run(&dir.path().join("nope"));
        assert!(matches!(result, Err(DeepScanError::RootPathUnavailable { .. })));
        assert_eq!(search.state(), SearchState::Failed);
    }

    #[test]
    fn test_invalid_regex_fails_before_walking() {
        let dir = TempDir::new().unwrap();
        let config = SearchConfig {
            text_is_regex: true,
            ..Default::default()
        };
        let record = ArtifactRecord::new(ArtifactId(1), "x", reference_time()).with_text("([");
        let search = DeepSearch::new(vec![record], config);
        assert!(matches!(search.run(dir.path()), Err(DeepScanError::Config(_))));
        assert_eq!(search.state(), SearchState::Failed);
    }

    #[test]
    fn test_record_without_timestamp_gets_diagnostic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("log.txt"), b"wipe_data done").unwrap();
        let record = ArtifactRecord::without_timestamp(ArtifactId(2), "/cache/recovery/last_log")
            .with_text("wipe_data");
        let report = DeepSearch::new(vec![record], SearchConfig::default())
            .run(dir.path())
            .unwrap();

        assert_eq!(report.diagnostics_of(DiagnosticKind::InvalidTimestamp).count(), 1);
        assert_eq!(report.summary.len(), 1);
        assert_eq!(report.summary[0].match_kind, MatchKind::TextPattern);
    }

    #[test]
    fn test_walker_stops_one_interval_after_cancel() {
        let dir = TempDir::new().unwrap();
        for i in 0..2000 {
            fs::write(dir.path().join(format!("f{:05}", i)), b"x").unwrap();
        }
        let config = SearchConfig {
            concurrency: 2,
            cancel_check_interval: 8,
            ..Default::default()
        };
        let record = ArtifactRecord::new(ArtifactId(1), "x", Utc::now());
        let search = DeepSearch::new(vec![record], config);
        let cancel = search.cancel_handle();

        // cancel from inside the walk, after the 100th item
        let walker = Walker::new(dir.path(), &search.config, search.cancel.flag()).unwrap();
        let mut seen = 0;
        for item in walker.walk() {
            seen += 1;
            if seen == 100 {
                cancel.cancel();
            }
            drop(item);
        }
        assert!(seen <= 100 + 8);

        // the flag is shared with the session, which now starts cancelled
        let report = search.run(dir.path()).unwrap();
        assert!(report.is_cancelled());
        assert_eq!(report.stats.files_scanned, 0);
        assert_eq!(search.state(), SearchState::Cancelled);
    }

    #[test]
    fn test_panicking_evaluation_becomes_diagnostic() {
        let path = Path::new("/dump/data/system/corrupt.db");
        let outcome = isolate_panics(path, || panic!("index out of range"));
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::MatcherPanicked);
        assert_eq!(outcome.diagnostics[0].path, path);
        assert_eq!(outcome.diagnostics[0].message, "index out of range");

        let formatted = isolate_panics(path, || panic!("bad length {}", 7));
        assert_eq!(formatted.diagnostics[0].message, "bad length 7");

        let clean = isolate_panics(path, CandidateOutcome::default);
        assert!(clean.is_empty());
    }

    #[test]
    fn test_unbounded_tolerance_keeps_content_matches() {
        let config = SearchConfig {
            tolerance_secs: u64::MAX,
            ..Default::default()
        };
        let record = ArtifactRecord::new(ArtifactId(1), "/data/misc/bootstat/x", reference_time())
            .with_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let mut content = vec![0u8; 64];
        content[8..12].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let path = Path::new("/dump/data/system/x.bin");
        let prepared = prepared(record, &config);
        let far = candidate(reference_time() + Duration::days(9000), content);

        let outcome = isolate_panics(path, || evaluate_candidate(&far, &prepared, &config));
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(outcome.matches[1].offset(), Some(Offset::new(8)));
    }

    #[test]
    fn test_bytes_read_counts_full_content_scans() {
        let dir = TempDir::new().unwrap();
        let mut content = vec![0u8; 4096];
        content[4000..4004].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        fs::write(dir.path().join("big.bin"), &content).unwrap();
        let config = SearchConfig {
            prefix_len: 256,
            enabled_matchers: vec![MatchKind::ByteSignature],
            ..Default::default()
        };
        let record = ArtifactRecord::new(ArtifactId(1), "x", reference_time())
            .with_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let report = DeepSearch::new(vec![record], config).run(dir.path()).unwrap();
        assert_eq!(report.summary.len(), 1);
        assert_eq!(report.stats.bytes_read, 4096);
    }

    #[test]
    fn test_background_handle_join() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let handle = DeepSearch::new(Vec::new(), SearchConfig::default())
            .start(dir.path())
            .unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.outcome, SearchOutcome::Completed);
    }

    #[test]
    fn test_cancel_and_wait_reports_cancelled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let search = DeepSearch::new(Vec::new(), SearchConfig::default());
        search.cancel();
        let handle = search.start(dir.path()).unwrap();
        assert!(handle.cancel_handle().is_cancelled());

        let report = handle.cancel_and_wait().unwrap();
        assert!(report.is_cancelled());
        assert_eq!(report.stats.files_scanned, 0);
    }

    #[tokio::test]
    async fn test_progress_events_stream() {
        let dir = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let search = DeepSearch::new(Vec::new(), SearchConfig::default()).with_progress(tx);
        let root = dir.path().to_path_buf();
        let report = tokio::task::spawn_blocking(move || search.run(&root))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.stats.files_scanned, 3);

        let mut scanned = 0;
        let mut finished = None;
        while let Some(event) = rx.recv().await {
            match event {
                ScanProgress::Scanned { .. } => scanned += 1,
                ScanProgress::Finished { scanned_count, cancelled, .. } => {
                    finished = Some((scanned_count, cancelled))
                }
            }
        }
        assert_eq!(scanned, 3);
        assert_eq!(finished, Some((3, false)));
    }
}
