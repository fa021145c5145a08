//! Filesystem walker producing candidate files.
//!
//! Traversal is depth-first in file-name order, so two walks over the same
//! snapshot yield the same sequence. Symlinks are never followed. Unreadable
//! entries become diagnostics and the walk continues.

use crate::content::{read_prefix, CandidateFile, ContentSource};
use crate::error::{DeepScanError, Result};
use crate::report::{Diagnostic, DiagnosticKind};
use crate::time::system_time_to_utc;
use crate::types::SearchConfig;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use walkdir::WalkDir;

/// One item of a walk
#[derive(Debug)]
pub enum WalkItem {
    Candidate(CandidateFile),
    Diagnostic(Diagnostic),
}

/// Include/exclude globs matched against root-relative, `/`-separated paths
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// Everything passes
    pub fn allow_all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        let normalized = normalize(relative);
        self.exclude
            .as_ref()
            .map_or(false, |set| set.is_match(normalized.as_str()))
    }

    pub fn allows(&self, relative: &Path) -> bool {
        let normalized = normalize(relative);
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(normalized.as_str()) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(normalized.as_str()),
            None => true,
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| DeepScanError::InvalidPattern(format!("glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| DeepScanError::InvalidPattern(e.to_string()))
}

fn normalize(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

/// Configured walker over one root. Every call to [`Walker::walk`] starts a
/// fresh traversal.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    filter: Arc<PathFilter>,
    prefix_len: usize,
    check_interval: usize,
    cancel: Arc<AtomicBool>,
}

impl Walker {
    /// Fails with `RootPathUnavailable` when the root cannot be listed.
    pub fn new(root: impl Into<PathBuf>, config: &SearchConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let root = root.into();
        check_root(&root)?;
        Ok(Self {
            root,
            filter: Arc::new(PathFilter::new(&config.include_globs, &config.exclude_globs)?),
            prefix_len: config.prefix_len,
            check_interval: config.cancel_check_interval.max(1),
            cancel,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn walk(&self) -> Walk {
        let inner = WalkDir::new(&self.root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();
        Walk {
            walker: self.clone(),
            inner,
            pending: None,
            visited: 0,
            stopped: false,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Stat the entry and read its prefix
    fn load(&self, path: &Path, metadata: std::fs::Metadata) -> (Option<CandidateFile>, Option<Diagnostic>) {
        let prefix = match read_prefix(path, self.prefix_len) {
            Ok(prefix) => prefix,
            Err(err) => {
                debug!("Skipping {}: {}", path.display(), err);
                return (None, Some(Diagnostic::from_io(path, &err)));
            }
        };

        let mut diagnostic = None;
        let mtime = match metadata.modified() {
            Ok(time) => match system_time_to_utc(time) {
                Ok(mtime) => Some(mtime),
                Err(err) => {
                    diagnostic = Some(Diagnostic::new(
                        path,
                        DiagnosticKind::InvalidTimestamp,
                        err.to_string(),
                    ));
                    None
                }
            },
            Err(err) => {
                diagnostic = Some(Diagnostic::from_io(path, &err));
                None
            }
        };

        let candidate = CandidateFile::new(
            path.to_path_buf(),
            metadata.len(),
            mtime,
            prefix,
            ContentSource::File(path.to_path_buf()),
        );
        (Some(candidate), diagnostic)
    }
}

fn check_root(root: &Path) -> Result<()> {
    let unavailable = |reason: String| DeepScanError::RootPathUnavailable {
        path: root.display().to_string(),
        reason,
    };
    let metadata = std::fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    std::fs::read_dir(root).map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}

/// A single pass over the tree. Stops without error once cancelled.
pub struct Walk {
    walker: Walker,
    inner: walkdir::IntoIter,
    pending: Option<WalkItem>,
    visited: usize,
    stopped: bool,
}

impl Walk {
    /// Entries seen so far, including skipped ones
    pub fn visited(&self) -> usize {
        self.visited
    }
}

impl Iterator for Walk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }

        loop {
            if self.stopped {
                return None;
            }
            if self.visited % self.walker.check_interval == 0 && self.walker.is_cancelled() {
                debug!("Walk cancelled after {} entries", self.visited);
                self.stopped = true;
                return None;
            }

            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    self.visited += 1;
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.walker.root.clone());
                    let diagnostic = match err.io_error() {
                        Some(io) => Diagnostic::from_io(&path, io),
                        None => Diagnostic::new(&path, DiagnosticKind::Io, err.to_string()),
                    };
                    debug!("Walk error at {}: {}", path.display(), diagnostic.message);
                    return Some(WalkItem::Diagnostic(diagnostic));
                }
            };
            self.visited += 1;

            let relative = entry
                .path()
                .strip_prefix(&self.walker.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                if self.walker.filter.allows(&relative) {
                    return Some(WalkItem::Diagnostic(Diagnostic::new(
                        entry.path(),
                        DiagnosticKind::SymlinkSkipped,
                        "symbolic link not followed",
                    )));
                }
                continue;
            }

            if file_type.is_dir() {
                if self.walker.filter.is_excluded(&relative) {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if !file_type.is_file() || !self.walker.filter.allows(&relative) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    let diagnostic = match err.io_error() {
                        Some(io) => Diagnostic::from_io(entry.path(), io),
                        None => Diagnostic::new(entry.path(), DiagnosticKind::Io, err.to_string()),
                    };
                    return Some(WalkItem::Diagnostic(diagnostic));
                }
            };

            let (candidate, diagnostic) = self.walker.load(entry.path(), metadata);
            match candidate {
                Some(candidate) => {
                    self.pending = diagnostic.map(WalkItem::Diagnostic);
                    return Some(WalkItem::Candidate(candidate));
                }
                None => {
                    if let Some(diagnostic) = diagnostic {
                        return Some(WalkItem::Diagnostic(diagnostic));
                    }
                }
            }
        }
    }
}
