use crate::error::{DeepScanError, Result};
use crate::types::Size;
use chrono::{DateTime, Utc};
use memmap2::Mmap;
use std::cell::{Cell, OnceCell};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the full content of a candidate comes from
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// A file on disk, mapped on demand
    File(PathBuf),
    /// Content already in memory
    Memory(Arc<[u8]>),
}

/// Full content of a candidate, either mapped or owned
#[derive(Debug, Clone)]
pub enum ContentBuffer {
    Mapped(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

impl ContentBuffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ContentBuffer::Mapped(mmap) => &mmap[..],
            ContentBuffer::Owned(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// One file produced by the walker.
///
/// The prefix is read eagerly and the file handle closed; the full content is
/// loaded at most once, on the first matcher that needs it, and released with
/// the candidate.
#[derive(Debug)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// `None` when the filesystem time is not representable (pre-epoch)
    pub mtime_utc: Option<DateTime<Utc>>,
    pub content_prefix: Vec<u8>,
    source: ContentSource,
    full: OnceCell<std::result::Result<ContentBuffer, String>>,
    /// High-water mark of bytes handed to matchers
    examined: Cell<u64>,
}

impl CandidateFile {
    pub fn new(
        path: PathBuf,
        size_bytes: u64,
        mtime_utc: Option<DateTime<Utc>>,
        content_prefix: Vec<u8>,
        source: ContentSource,
    ) -> Self {
        let examined = Cell::new(content_prefix.len() as u64);
        Self {
            path,
            size_bytes,
            mtime_utc,
            content_prefix,
            source,
            full: OnceCell::new(),
            examined,
        }
    }

    /// In-memory candidate; the prefix is the first `prefix_len` bytes.
    pub fn from_bytes(
        path: impl Into<PathBuf>,
        mtime_utc: Option<DateTime<Utc>>,
        content: impl Into<Vec<u8>>,
        prefix_len: usize,
    ) -> Self {
        let content: Vec<u8> = content.into();
        let prefix = content[..content.len().min(prefix_len)].to_vec();
        let size = content.len() as u64;
        Self::new(
            path.into(),
            size,
            mtime_utc,
            prefix,
            ContentSource::Memory(Arc::from(content)),
        )
    }

    pub fn size(&self) -> Size {
        Size::new(self.size_bytes)
    }

    /// True when the prefix already holds the whole file
    pub fn prefix_is_complete(&self) -> bool {
        self.content_prefix.len() as u64 >= self.size_bytes
    }

    /// Bytes the matchers were given: the prefix, widened by any window or
    /// full-content read.
    pub fn bytes_examined(&self) -> u64 {
        self.examined.get()
    }

    fn mark_examined(&self, len: usize) {
        self.examined.set(self.examined.get().max(len as u64));
    }

    /// Load the full content, once.
    pub fn full_content(&self) -> Result<&[u8]> {
        let full = self.load()?;
        self.mark_examined(full.len());
        Ok(full)
    }

    fn load(&self) -> Result<&[u8]> {
        let loaded = self.full.get_or_init(|| match &self.source {
            ContentSource::Memory(bytes) => Ok(ContentBuffer::Owned(Arc::clone(bytes))),
            ContentSource::File(path) => map_file(path)
                .map(|mmap| match mmap {
                    Some(mmap) => ContentBuffer::Mapped(Arc::new(mmap)),
                    None => ContentBuffer::Owned(Arc::from(Vec::new())),
                })
                .map_err(|e| e.to_string()),
        });

        match loaded {
            Ok(buffer) => Ok(buffer.as_slice()),
            Err(message) => Err(DeepScanError::Mmap(message.clone())),
        }
    }

    /// First `limit` bytes, using the prefix when it is long enough.
    pub fn window(&self, limit: usize) -> Result<&[u8]> {
        if self.content_prefix.len() >= limit || self.prefix_is_complete() {
            let end = self.content_prefix.len().min(limit);
            return Ok(&self.content_prefix[..end]);
        }
        let full = self.load()?;
        let window = &full[..full.len().min(limit)];
        self.mark_examined(window.len());
        Ok(window)
    }
}

/// Read at most `limit` bytes from the start of `path`. The handle is closed
/// before returning.
pub fn read_prefix(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buffer = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Memory-map a whole file. Empty files cannot be mapped and yield `None`.
fn map_file(path: &Path) -> Result<Option<Mmap>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // Safety: the mapping is read-only and lives no longer than the candidate.
    let mmap = unsafe {
        Mmap::map(&file).map_err(|e| {
            DeepScanError::Mmap(format!("Failed to mmap {}: {}", path.display(), e))
        })?
    };
    Ok(Some(mmap))
}
